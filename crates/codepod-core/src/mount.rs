//! Host file trees staged for mounting into the sandbox.

use crate::error::SandboxError;
use crate::vfs::{normalize_path, FlatFiles, VirtualFileSystem};
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Map, Value};

/// Files to mount at an absolute sandbox path.
///
/// Built on the host, sent once, never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    path: String,
    files: FlatFiles,
}

impl MountSpec {
    /// Mount a flat `subpath → contents` map at `path`.
    ///
    /// Subpaths are normalised. `path` must be absolute.
    ///
    /// Fails with [`SandboxError::Programming`] if a subpath normalises to
    /// the mount root, two subpaths normalise to the same file, or one file
    /// sits below another.
    pub fn new<I, K, V>(path: impl Into<String>, files: I) -> Result<Self, SandboxError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Vec<u8>>,
    {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(SandboxError::Programming(format!(
                "mount path must be absolute: {path:?}"
            )));
        }

        let mut staged = FlatFiles::new();
        for (raw, data) in files {
            let subpath = normalize_path(raw.as_ref());
            if subpath.is_empty() {
                return Err(SandboxError::Programming(format!(
                    "mount file path names the mount root: {:?}",
                    raw.as_ref()
                )));
            }
            if staged.insert(subpath.clone(), data.into()).is_some() {
                return Err(SandboxError::Programming(format!(
                    "duplicate mount file path: {subpath:?}"
                )));
            }
        }
        if let Some((file, below)) = first_nested(&staged) {
            return Err(SandboxError::Programming(format!(
                "mount file {below:?} is below file {file:?}"
            )));
        }

        Ok(Self { path, files: staged })
    }

    /// Mount the flattened contents of `fs` at `path`.
    pub fn from_vfs(path: impl Into<String>, fs: &dyn VirtualFileSystem) -> Result<Self, SandboxError> {
        let files = fs.to_flat_files()?;
        Self::new(path, files)
    }

    /// Absolute mount point inside the sandbox.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Files relative to the mount point.
    pub fn files(&self) -> &FlatFiles {
        &self.files
    }

    /// Wire form: `{path, files: {subpath: base64}}`.
    pub fn to_params(&self) -> Value {
        let files: Map<String, Value> = self
            .files
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(general_purpose::STANDARD.encode(v))))
            .collect();
        json!({ "path": self.path, "files": files })
    }
}

/// A pair of stored paths where the second lies inside the first.
fn first_nested(files: &FlatFiles) -> Option<(&str, &str)> {
    files.keys().find_map(|file| {
        let prefix = format!("{file}/");
        files
            .range(prefix.clone()..)
            .next()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| (file.as_str(), key.as_str()))
    })
}
