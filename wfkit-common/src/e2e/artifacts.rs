//! Artifacts uploaded to act's local artifact server.
//!
//! act stores each artifact as a zip under
//! `<artifact-server-path>/<run-id>/`, either as `<name>.zip` or as a single
//! zip inside a `<name>/` directory depending on the upload-artifact version.

use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;
use zip::result::ZipError;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact {name} for run {run_id} not found under {searched}")]
    NotFound {
        run_id: String,
        name: String,
        searched: PathBuf,
    },

    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{archive} is not a valid zip archive: {source}")]
    Archive {
        archive: String,
        #[source]
        source: ZipError,
    },

    #[error("{archive} has no entry {entry}")]
    MissingEntry { archive: String, entry: String },

    #[error("failed to read {entry} from {archive}: {source}")]
    Entry {
        archive: String,
        entry: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{entry} in {archive} is not UTF-8")]
    NotText { archive: String, entry: String },

    #[error("cannot open {entry}: only one level of nested archives is supported")]
    TooDeep { entry: String },
}

/// Locates artifacts below an artifact-server root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Zip file holding artifact `name` of run `run_id`.
    pub fn locate(&self, run_id: &str, name: &str) -> Result<PathBuf, ArtifactError> {
        let run_dir = self.root.join(run_id);
        let flat = run_dir.join(format!("{name}.zip"));
        if flat.is_file() {
            return Ok(flat);
        }

        let dir = run_dir.join(name);
        let not_found = || ArtifactError::NotFound {
            run_id: run_id.to_string(),
            name: name.to_string(),
            searched: run_dir.clone(),
        };
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(source) => return Err(ArtifactError::Io { path: dir, source }),
        };
        let mut zips: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "zip"))
            .collect();
        zips.sort();
        zips.into_iter().next().ok_or_else(not_found)
    }

    /// Open artifact `name` of run `run_id`.
    pub fn open(&self, run_id: &str, name: &str) -> Result<ArtifactFolder<File>, ArtifactError> {
        let path = self.locate(run_id, name)?;
        ArtifactFolder::open(&path)
    }
}

/// A zip archive browsed as a file tree. Dropping it (or calling
/// [`ArtifactFolder::close`]) releases the underlying reader.
pub struct ArtifactFolder<R: Read + Seek> {
    label: String,
    archive: ZipArchive<R>,
    nested: bool,
}

impl ArtifactFolder<File> {
    pub fn open(path: &Path) -> Result<Self, ArtifactError> {
        let file = File::open(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(path.display().to_string(), file)
    }
}

impl<R: Read + Seek> ArtifactFolder<R> {
    pub fn from_reader(label: impl Into<String>, reader: R) -> Result<Self, ArtifactError> {
        let label = label.into();
        let archive = ZipArchive::new(reader).map_err(|source| ArtifactError::Archive {
            archive: label.clone(),
            source,
        })?;
        Ok(Self {
            label,
            archive,
            nested: false,
        })
    }

    /// Paths of every file (not directory) in the archive, sorted.
    pub fn files(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .archive
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.archive.index_for_name(entry).is_some()
    }

    pub fn read(&mut self, entry: &str) -> Result<Vec<u8>, ArtifactError> {
        let mut file = self.archive.by_name(entry).map_err(|source| match source {
            ZipError::FileNotFound => ArtifactError::MissingEntry {
                archive: self.label.clone(),
                entry: entry.to_string(),
            },
            source => ArtifactError::Archive {
                archive: self.label.clone(),
                source,
            },
        })?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|source| ArtifactError::Entry {
                archive: self.label.clone(),
                entry: entry.to_string(),
                source,
            })?;
        Ok(contents)
    }

    pub fn read_to_string(&mut self, entry: &str) -> Result<String, ArtifactError> {
        let bytes = self.read(entry)?;
        String::from_utf8(bytes).map_err(|_| ArtifactError::NotText {
            archive: self.label.clone(),
            entry: entry.to_string(),
        })
    }

    /// Open a zip stored inside this archive. The nested archive is read
    /// into memory and cannot itself be descended into.
    pub fn open_nested(&mut self, entry: &str) -> Result<ArtifactFolder<Cursor<Vec<u8>>>, ArtifactError> {
        if self.nested {
            return Err(ArtifactError::TooDeep {
                entry: entry.to_string(),
            });
        }
        let bytes = self.read(entry)?;
        let mut folder =
            ArtifactFolder::from_reader(format!("{}!{entry}", self.label), Cursor::new(bytes))?;
        folder.nested = true;
        Ok(folder)
    }

    /// Release the archive.
    pub fn close(self) {}
}

impl<R: Read + Seek> std::fmt::Debug for ArtifactFolder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactFolder")
            .field("label", &self.label)
            .field("entries", &self.archive.len())
            .field("nested", &self.nested)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    fn zip_bytes(entries: Vec<(&str, Vec<u8>)>) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in entries {
            if name.ends_with('/') {
                writer.add_directory(name, SimpleFileOptions::default()).unwrap();
            } else {
                writer.start_file(name, SimpleFileOptions::default()).unwrap();
                writer.write_all(&contents).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    fn plugin_bundle() -> Vec<u8> {
        let inner = zip_bytes(vec![
            ("my-plugin/plugin.json", br#"{"id":"my-plugin"}"#.to_vec()),
            ("my-plugin/module.js", b"console.log(1)".to_vec()),
        ]);
        zip_bytes(vec![
            ("dist/", Vec::new()),
            ("my-plugin-1.0.0.zip", inner),
            ("my-plugin-1.0.0.zip.sha1", b"abc123".to_vec()),
        ])
    }

    #[test]
    fn test_store_opens_flat_layout() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("1")).unwrap();
        std::fs::write(root.path().join("1/dist-artifacts.zip"), plugin_bundle()).unwrap();

        let store = ArtifactStore::new(root.path());
        let mut folder = store.open("1", "dist-artifacts").unwrap();
        assert_eq!(
            folder.files(),
            vec!["my-plugin-1.0.0.zip", "my-plugin-1.0.0.zip.sha1"]
        );
        assert_eq!(folder.read_to_string("my-plugin-1.0.0.zip.sha1").unwrap(), "abc123");
        folder.close();
    }

    #[test]
    fn test_store_opens_directory_layout() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("7/dist-artifacts");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("bundle.zip"), plugin_bundle()).unwrap();

        let store = ArtifactStore::new(root.path());
        assert_eq!(store.locate("7", "dist-artifacts").unwrap(), dir.join("bundle.zip"));
        assert!(store.open("7", "dist-artifacts").unwrap().contains("my-plugin-1.0.0.zip"));
    }

    #[test]
    fn test_store_missing_artifact() {
        let root = tempfile::tempdir().unwrap();
        let err = ArtifactStore::new(root.path()).open("1", "nope").unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound { .. }));
    }

    #[test]
    fn test_nested_archive_one_level() {
        let mut outer = ArtifactFolder::from_reader("outer", Cursor::new(plugin_bundle())).unwrap();
        let mut inner = outer.open_nested("my-plugin-1.0.0.zip").unwrap();
        assert_eq!(
            inner.read_to_string("my-plugin/plugin.json").unwrap(),
            r#"{"id":"my-plugin"}"#
        );
        assert!(matches!(
            inner.open_nested("my-plugin/module.js"),
            Err(ArtifactError::TooDeep { .. })
        ));
    }

    #[test]
    fn test_missing_entry_and_bad_archive() {
        let mut folder = ArtifactFolder::from_reader("outer", Cursor::new(plugin_bundle())).unwrap();
        assert!(matches!(
            folder.read("nope.txt"),
            Err(ArtifactError::MissingEntry { .. })
        ));

        let err = ArtifactFolder::from_reader("junk", Cursor::new(b"not a zip".to_vec())).unwrap_err();
        assert!(matches!(err, ArtifactError::Archive { .. }));
    }
}
