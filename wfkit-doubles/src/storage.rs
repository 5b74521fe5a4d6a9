//! Local directory standing in for cloud object storage.
//!
//! Mocked upload steps copy into `<root>/<bucket>/<path>`, so a test checks
//! what a pipeline uploaded by reading the tree back through a
//! [`StorageView`]. The root must be mounted into job containers
//! (`Runner::mount`) for the copy to land on the host.

use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;

use crate::DoubleError;

/// A private storage tree, removed on drop.
#[derive(Debug)]
pub struct MockStorage {
    dir: TempDir,
}

impl MockStorage {
    pub fn new() -> Result<Self, DoubleError> {
        let dir = tempfile::Builder::new()
            .prefix("wfkit-storage-")
            .tempdir()
            .map_err(|source| DoubleError::Io {
                path: std::env::temp_dir(),
                source,
            })?;
        tracing::debug!(root = %dir.path().display(), "mock storage created");
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Read-only view of the tree.
    pub fn fs(&self) -> StorageView {
        StorageView {
            root: self.dir.path().to_path_buf(),
        }
    }
}

/// Read-only access to a storage tree by `bucket/object` paths.
#[derive(Debug, Clone)]
pub struct StorageView {
    root: PathBuf,
}

impl StorageView {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, object: &str) -> Result<PathBuf, DoubleError> {
        let relative = Path::new(object.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(DoubleError::InvalidPath(object.to_string()));
        }
        Ok(self.root.join(relative))
    }

    pub fn exists(&self, object: &str) -> bool {
        self.resolve(object).is_ok_and(|path| path.exists())
    }

    pub fn read(&self, object: &str) -> Result<Vec<u8>, DoubleError> {
        let path = self.resolve(object)?;
        std::fs::read(&path).map_err(|source| DoubleError::Io { path, source })
    }

    pub fn read_to_string(&self, object: &str) -> Result<String, DoubleError> {
        let bytes = self.read(object)?;
        String::from_utf8(bytes).map_err(|_| DoubleError::NotText(self.root.join(object)))
    }

    /// Every regular file, as sorted `/`-separated paths relative to the root.
    pub fn files(&self) -> Result<Vec<String>, DoubleError> {
        let mut files = Vec::new();
        collect_files(&self.root, "", &mut files)?;
        files.sort();
        Ok(files)
    }
}

fn collect_files(dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<(), DoubleError> {
    let entries = std::fs::read_dir(dir).map_err(|source| DoubleError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| DoubleError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        let file_type = entry.file_type().map_err(|source| DoubleError::Io {
            path: entry.path(),
            source,
        })?;
        if file_type.is_dir() {
            collect_files(&entry.path(), &relative, out)?;
        } else if file_type.is_file() {
            out.push(relative);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_lists_and_reads_files() {
        let storage = MockStorage::new().unwrap();
        let dir = storage.root().join("bucket/builds/dist");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("b.zip"), b"zip").unwrap();
        std::fs::write(dir.join("nested/a.txt"), "hello").unwrap();

        let fs = storage.fs();
        assert_eq!(
            fs.files().unwrap(),
            vec!["bucket/builds/dist/b.zip", "bucket/builds/dist/nested/a.txt"]
        );
        assert!(fs.exists("bucket/builds/dist/b.zip"));
        assert!(fs.exists("/bucket/builds"));
        assert!(!fs.exists("bucket/missing"));
        assert_eq!(fs.read_to_string("bucket/builds/dist/nested/a.txt").unwrap(), "hello");
    }

    #[test]
    fn test_view_rejects_escaping_paths() {
        let storage = MockStorage::new().unwrap();
        assert!(matches!(
            storage.fs().read("bucket/../../etc/passwd"),
            Err(DoubleError::InvalidPath(_))
        ));
        assert!(!storage.fs().exists("../x"));
    }

    #[test]
    fn test_storage_removed_on_drop() {
        let storage = MockStorage::new().unwrap();
        let root = storage.root().to_path_buf();
        assert!(root.is_dir());
        drop(storage);
        assert!(!root.exists());
    }

    #[test]
    fn test_read_missing_object() {
        let storage = MockStorage::new().unwrap();
        assert!(matches!(
            storage.fs().read("bucket/none"),
            Err(DoubleError::Io { .. })
        ));
        assert!(storage.fs().files().unwrap().is_empty());
    }
}
