//! In-memory filesystem backed by a flat map of files.

use super::{join, normalize_path, DirEntry, EntryKind, FileStat, FlatFiles, VfsError, VirtualFileSystem};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

/// In-memory VFS that stores only files.
///
/// Directories exist implicitly: a path is a directory iff it is a strict
/// prefix (on a `/` boundary) of some stored file. A path can never be both,
/// so writes that would make a file shadow a directory, or the other way
/// round, are rejected.
///
/// ```
/// use codepod_core::{MemoryFs, VirtualFileSystem};
///
/// let fs = MemoryFs::from_files([("lib/utils.py", "def greet(): return 'hello'")]).unwrap();
/// assert!(fs.exists("lib"));
/// assert_eq!(fs.read_file("./lib/utils.py").unwrap(), b"def greet(): return 'hello'");
/// ```
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: RwLock<FlatFiles>,
    writable: bool,
}

impl MemoryFs {
    /// Create an empty, read-only filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a read-only filesystem seeded with `files`.
    ///
    /// Keys are normalised. Fails if two entries collide as file and directory.
    pub fn from_files<I, K, V>(files: I) -> Result<Self, VfsError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Vec<u8>>,
    {
        let mut store = FlatFiles::new();
        for (path, data) in files {
            insert(&mut store, path.as_ref(), data.into())?;
        }
        Ok(Self {
            files: RwLock::new(store),
            writable: false,
        })
    }

    /// Allow or forbid writes.
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// True if [`VirtualFileSystem::write_file`] is permitted.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.store().len()
    }

    /// True if no files are stored.
    pub fn is_empty(&self) -> bool {
        self.store().is_empty()
    }

    fn store(&self) -> RwLockReadGuard<'_, FlatFiles> {
        self.files.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// True if `path` (normalised, non-empty) is an implicit directory in `store`.
fn is_dir(store: &FlatFiles, path: &str) -> bool {
    if path.is_empty() {
        return true;
    }
    let prefix = format!("{path}/");
    store
        .range(prefix.clone()..)
        .next()
        .is_some_and(|(key, _)| key.starts_with(&prefix))
}

fn insert(store: &mut FlatFiles, raw: &str, data: Vec<u8>) -> Result<(), VfsError> {
    let path = normalize_path(raw);
    if is_dir(store, &path) {
        return Err(VfsError::IsDirectory(path));
    }
    let mut ancestor = String::new();
    let segments: Vec<&str> = path.split('/').collect();
    for segment in &segments[..segments.len() - 1] {
        ancestor = join(&ancestor, segment);
        if store.contains_key(&ancestor) {
            return Err(VfsError::NotDirectory(ancestor));
        }
    }
    store.insert(path, data);
    Ok(())
}

fn list(store: &FlatFiles, path: &str) -> BTreeMap<String, EntryKind> {
    let prefix = if path.is_empty() {
        String::new()
    } else {
        format!("{path}/")
    };
    let mut seen = BTreeMap::new();
    for key in store.keys().filter(|k| k.starts_with(&prefix)) {
        let rest = &key[prefix.len()..];
        if rest.is_empty() {
            continue;
        }
        let (name, kind) = match rest.split_once('/') {
            Some((name, _)) => (name, EntryKind::Dir),
            None => (rest, EntryKind::File),
        };
        let slot = seen.entry(name.to_string()).or_insert(kind);
        if kind == EntryKind::Dir {
            *slot = EntryKind::Dir;
        }
    }
    seen
}

impl VirtualFileSystem for MemoryFs {
    fn read_file(&self, path: &str) -> Result<Vec<u8>, VfsError> {
        let path = normalize_path(path);
        let store = self.store();
        if let Some(data) = store.get(&path) {
            return Ok(data.clone());
        }
        if is_dir(&store, &path) {
            return Err(VfsError::IsDirectory(path));
        }
        Err(VfsError::NotFound(path))
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<(), VfsError> {
        if !self.writable {
            return Err(VfsError::PermissionDenied("read-only filesystem".to_string()));
        }
        let mut store = self.files.write().unwrap_or_else(PoisonError::into_inner);
        tracing::trace!(path = %path, len = data.len(), "MemoryFs write");
        insert(&mut store, path, data.to_vec())
    }

    fn exists(&self, path: &str) -> bool {
        let path = normalize_path(path);
        let store = self.store();
        store.contains_key(&path) || is_dir(&store, &path)
    }

    fn stat(&self, path: &str) -> Result<FileStat, VfsError> {
        let path = normalize_path(path);
        let store = self.store();
        if let Some(data) = store.get(&path) {
            return Ok(FileStat {
                kind: EntryKind::File,
                size: data.len() as u64,
            });
        }
        if is_dir(&store, &path) {
            return Ok(FileStat {
                kind: EntryKind::Dir,
                size: list(&store, &path).len() as u64,
            });
        }
        Err(VfsError::NotFound(path))
    }

    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>, VfsError> {
        let path = normalize_path(path);
        let store = self.store();
        if store.contains_key(&path) {
            return Err(VfsError::NotDirectory(path));
        }
        if !is_dir(&store, &path) {
            return Err(VfsError::NotFound(path));
        }
        Ok(list(&store, &path)
            .into_iter()
            .map(|(name, kind)| DirEntry::new(name, kind))
            .collect())
    }

    fn to_flat_files(&self) -> Result<FlatFiles, VfsError> {
        Ok(self.store().clone())
    }
}
