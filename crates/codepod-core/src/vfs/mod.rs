//! Host-side virtual filesystems staged into the sandbox as mounts.
//!
//! All paths are relative to the filesystem root and are normalised with
//! [`normalize_path`] before use; the empty string names the root.
//! Any implementation can be flattened into a single `path → bytes` map with
//! [`VirtualFileSystem::to_flat_files`], which is what goes over the wire.

mod local;
mod memory;

pub use local::LocalFs;
pub use memory::MemoryFs;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Flat `path → contents` map, the transport form of a file tree.
pub type FlatFiles = BTreeMap<String, Vec<u8>>;

/// Errors returned by [`VirtualFileSystem`] operations.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Nothing exists at the path.
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// The path is a directory where a file was required.
    #[error("is a directory: {0}")]
    IsDirectory(String),

    /// The path (or one of its ancestors) is a file where a directory was required.
    #[error("not a directory: {0}")]
    NotDirectory(String),

    /// The filesystem does not accept writes.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Host I/O failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Kind of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Dir => write!(f, "dir"),
        }
    }
}

/// File or directory metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Entry kind.
    pub kind: EntryKind,
    /// Byte length for files, number of immediate children for directories.
    pub size: u64,
}

/// A single entry in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirEntry {
    /// Entry name (one path segment).
    pub name: String,
    /// Entry kind.
    pub kind: EntryKind,
}

impl DirEntry {
    /// Entry named `name` (a single path segment).
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Capability interface for a hierarchical file store.
///
/// Implement this to expose any host-side file source (memory, local disk,
/// a database) to the sandbox through [`crate::MountSpec::from_vfs`].
pub trait VirtualFileSystem {
    /// Read a file. Fails with `NotFound` or `IsDirectory`.
    fn read_file(&self, path: &str) -> Result<Vec<u8>, VfsError>;

    /// Create or replace a file. Fails with `PermissionDenied` if read-only.
    fn write_file(&self, path: &str, data: &[u8]) -> Result<(), VfsError>;

    /// Whether a file or directory exists at `path`. The root always exists.
    fn exists(&self, path: &str) -> bool;

    /// Type and size of the entry at `path`.
    fn stat(&self, path: &str) -> Result<FileStat, VfsError>;

    /// Immediate children of the directory at `path`, in no particular order.
    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>, VfsError>;

    /// Collect every file in the tree into one flat map.
    ///
    /// The default walks depth-first from the root using [`readdir`] and
    /// [`read_file`]; implementations with a flat store may return it directly.
    ///
    /// [`readdir`]: VirtualFileSystem::readdir
    /// [`read_file`]: VirtualFileSystem::read_file
    fn to_flat_files(&self) -> Result<FlatFiles, VfsError> {
        let mut out = FlatFiles::new();
        walk(self, "", &mut out)?;
        Ok(out)
    }
}

fn walk<F>(fs: &F, prefix: &str, out: &mut FlatFiles) -> Result<(), VfsError>
where
    F: VirtualFileSystem + ?Sized,
{
    for entry in fs.readdir(prefix)? {
        let subpath = join(prefix, &entry.name);
        match entry.kind {
            EntryKind::Dir => walk(fs, &subpath, out)?,
            EntryKind::File => {
                let data = fs.read_file(&subpath)?;
                out.insert(subpath, data);
            }
        }
    }
    Ok(())
}

/// Join a normalised parent path and a child name.
pub(crate) fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Normalise a relative path.
///
/// Drops empty and `.` segments (so leading, trailing and doubled separators
/// disappear). `..` is kept verbatim; it is never resolved. Idempotent.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}
