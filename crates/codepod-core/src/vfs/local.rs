//! Read-only view of a host directory.

use super::{normalize_path, DirEntry, EntryKind, FileStat, VfsError, VirtualFileSystem};
use std::fs;
use std::path::{Path, PathBuf};

/// Read-only VFS over a directory on the host.
///
/// Flattening walks the directory with the default recursive walk. Symlinks
/// are followed; entries that are neither files nor directories are skipped.
/// Paths containing `..` are treated as missing, so nothing outside `root` is
/// reachable.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    /// Expose `root` (which must be a directory).
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, VfsError> {
        let root = root.into();
        let metadata = fs::metadata(&root).map_err(|e| io_error(root.display().to_string(), e))?;
        if !metadata.is_dir() {
            return Err(VfsError::NotDirectory(root.display().to_string()));
        }
        Ok(Self { root })
    }

    /// The host directory being exposed.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<(String, PathBuf), VfsError> {
        let path = normalize_path(path);
        if path.split('/').any(|segment| segment == "..") {
            return Err(VfsError::NotFound(path));
        }
        let host = if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(&path)
        };
        Ok((path, host))
    }
}

/// Map a host I/O failure on `path` to the matching VFS error.
fn io_error(path: String, source: std::io::Error) -> VfsError {
    match source.kind() {
        std::io::ErrorKind::NotFound => VfsError::NotFound(path),
        std::io::ErrorKind::PermissionDenied => VfsError::PermissionDenied(path),
        _ => VfsError::Io { path, source },
    }
}

impl VirtualFileSystem for LocalFs {
    fn read_file(&self, path: &str) -> Result<Vec<u8>, VfsError> {
        let (rel, host) = self.resolve(path)?;
        let metadata = fs::metadata(&host).map_err(|e| io_error(rel.clone(), e))?;
        if metadata.is_dir() {
            return Err(VfsError::IsDirectory(rel));
        }
        fs::read(&host).map_err(|e| io_error(rel, e))
    }

    fn write_file(&self, _path: &str, _data: &[u8]) -> Result<(), VfsError> {
        Err(VfsError::PermissionDenied("read-only filesystem".to_string()))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path)
            .map(|(_, host)| host.exists())
            .unwrap_or(false)
    }

    fn stat(&self, path: &str) -> Result<FileStat, VfsError> {
        let (rel, host) = self.resolve(path)?;
        let metadata = fs::metadata(&host).map_err(|e| io_error(rel.clone(), e))?;
        if metadata.is_dir() {
            Ok(FileStat {
                kind: EntryKind::Dir,
                size: self.readdir(&rel)?.len() as u64,
            })
        } else {
            Ok(FileStat {
                kind: EntryKind::File,
                size: metadata.len(),
            })
        }
    }

    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>, VfsError> {
        let (rel, host) = self.resolve(path)?;
        let metadata = fs::metadata(&host).map_err(|e| io_error(rel.clone(), e))?;
        if !metadata.is_dir() {
            return Err(VfsError::NotDirectory(rel));
        }

        let mut result = Vec::new();
        for entry in fs::read_dir(&host).map_err(|e| io_error(rel.clone(), e))? {
            let entry = entry.map_err(|e| io_error(rel.clone(), e))?;
            let Ok(name) = entry.file_name().into_string() else {
                tracing::debug!(dir = %host.display(), "Skipping non-UTF-8 entry name");
                continue;
            };
            // Follow symlinks so a linked directory is walked like a real one.
            let metadata = match fs::metadata(entry.path()) {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let kind = if metadata.is_dir() {
                EntryKind::Dir
            } else if metadata.is_file() {
                EntryKind::File
            } else {
                continue;
            };
            result.push(DirEntry::new(name, kind));
        }

        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemoryFs;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::create_dir_all(dir.path().join("dir/nested")).unwrap();
        fs::write(dir.path().join("dir/b.txt"), "b").unwrap();
        fs::write(dir.path().join("dir/nested/c.bin"), [0u8, 1, 2, 255]).unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        dir
    }

    #[test]
    fn test_flatten_matches_memory_fs() {
        let dir = tree();
        let local = LocalFs::new(dir.path()).unwrap();
        let memory = MemoryFs::from_files([
            ("a.txt", b"a".to_vec()),
            ("dir/b.txt", b"b".to_vec()),
            ("dir/nested/c.bin", vec![0u8, 1, 2, 255]),
        ])
        .unwrap();
        assert_eq!(local.to_flat_files().unwrap(), memory.to_flat_files().unwrap());
    }

    #[test]
    fn test_stat_and_readdir() {
        let dir = tree();
        let local = LocalFs::new(dir.path()).unwrap();

        let root = local.stat("").unwrap();
        assert_eq!(root.kind, EntryKind::Dir);
        assert_eq!(root.size, 3);

        let file = local.stat("dir/nested/c.bin").unwrap();
        assert_eq!(file, FileStat { kind: EntryKind::File, size: 4 });

        let names: Vec<String> = local.readdir("./dir/").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["b.txt", "nested"]);

        assert!(matches!(local.readdir("a.txt"), Err(VfsError::NotDirectory(_))));
        assert!(matches!(local.read_file("dir"), Err(VfsError::IsDirectory(_))));
        assert!(matches!(local.read_file("missing"), Err(VfsError::NotFound(_))));
    }

    #[test]
    fn test_is_read_only() {
        let dir = tree();
        let local = LocalFs::new(dir.path()).unwrap();
        assert!(matches!(
            local.write_file("a.txt", b"x"),
            Err(VfsError::PermissionDenied(_))
        ));
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"a");
    }

    #[test]
    fn test_parent_segments_do_not_escape() {
        let dir = tree();
        let local = LocalFs::new(dir.path().join("dir")).unwrap();
        assert!(!local.exists("../a.txt"));
        assert!(matches!(local.read_file("../a.txt"), Err(VfsError::NotFound(_))));
    }

    #[test]
    fn test_root_must_be_directory() {
        let dir = tree();
        assert!(matches!(
            LocalFs::new(dir.path().join("a.txt")),
            Err(VfsError::NotDirectory(_))
        ));
        assert!(matches!(
            LocalFs::new(dir.path().join("nowhere")),
            Err(VfsError::NotFound(_))
        ));
    }

    #[test]
    fn test_missing_paths_keep_relative_name() {
        let dir = tree();
        let local = LocalFs::new(dir.path()).unwrap();
        assert!(matches!(local.stat("dir/gone"), Err(VfsError::NotFound(p)) if p == "dir/gone"));
        assert!(matches!(local.readdir("./nope/"), Err(VfsError::NotFound(p)) if p == "nope"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_permission_denied() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tree();
        let locked = dir.path().join("dir");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // Privileged users bypass mode bits; nothing to check then.
        let bypassed = fs::metadata(locked.join("b.txt")).is_ok();

        let local = LocalFs::new(dir.path()).unwrap();
        let read = local.read_file("dir/b.txt");
        let stat = local.stat("dir/nested");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        if bypassed {
            return;
        }
        assert!(matches!(read, Err(VfsError::PermissionDenied(p)) if p == "dir/b.txt"));
        assert!(matches!(stat, Err(VfsError::PermissionDenied(p)) if p == "dir/nested"));
    }
}
