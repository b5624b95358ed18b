//! Content-addressed artifact directory
//!
//! One `<hash>.yml` file per compiled version. The alerting engine polls
//! this directory on its own schedule, so files only ever appear through
//! a rename from a dot-prefixed temporary name.

use crate::error::Result;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const ARTIFACT_EXTENSION: &str = "yml";

/// Directory of compiled rule artifacts keyed by content hash
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the artifact for a content hash
    pub fn path_for(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", hash, ARTIFACT_EXTENSION))
    }

    pub fn exists(&self, hash: &str) -> bool {
        self.path_for(hash).is_file()
    }

    /// Atomically write the artifact for `hash`
    pub fn install(&self, hash: &str, contents: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let final_path = self.path_for(hash);
        let tmp_path = self
            .dir
            .join(format!(".{}.{}.tmp", hash, uuid::Uuid::new_v4().simple()));

        let written = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &final_path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        tracing::debug!(path = %final_path.display(), "installed artifact");
        Ok(final_path)
    }

    /// Remove the artifact for `hash`. Missing files are not an error;
    /// returns whether a file was deleted.
    pub fn remove(&self, hash: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(hash)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Hashes of all installed artifacts
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut hashes = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if is_artifact(&path) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    hashes.push(stem.to_string());
                }
            }
        }
        hashes.sort();

        Ok(hashes)
    }

    /// Delete every artifact and any leftover temporary file.
    /// Returns the number of artifacts removed.
    pub fn clear(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if is_artifact(&path) {
                fs::remove_file(&path)?;
                removed += 1;
            } else if is_leftover_tmp(&path) {
                fs::remove_file(&path)?;
            }
        }

        tracing::info!(dir = %self.dir.display(), removed, "cleared artifact directory");
        Ok(removed)
    }
}

fn is_artifact(path: &Path) -> bool {
    path.is_file()
        && path.extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXTENSION)
        && !path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'))
}

fn is_leftover_tmp(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.') && n.ends_with(".tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("elastalert"));

        let path = store.install("abc", "name: x\n").unwrap();
        assert_eq!(path, dir.path().join("elastalert").join("abc.yml"));
        assert_eq!(path.parent(), Some(store.dir()));
        assert_eq!(fs::read_to_string(&path).unwrap(), "name: x\n");
        assert!(store.exists("abc"));

        assert!(store.remove("abc").unwrap());
        assert!(!store.remove("abc").unwrap());
        assert!(!store.exists("abc"));
    }

    #[test]
    fn test_install_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        store.install("abc", "one\n").unwrap();
        store.install("abc", "two\n").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["abc.yml".to_string()]);
        assert_eq!(fs::read_to_string(store.path_for("abc")).unwrap(), "two\n");
    }

    #[test]
    fn test_clear_only_touches_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        store.install("a", "x").unwrap();
        store.install("b", "y").unwrap();
        fs::write(dir.path().join(".c.123.tmp"), "partial").unwrap();
        fs::write(dir.path().join("README.txt"), "keep").unwrap();

        assert_eq!(store.list().unwrap(), vec!["a", "b"]);
        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.list().unwrap().is_empty());
        assert!(dir.path().join("README.txt").exists());
        assert!(!dir.path().join(".c.123.tmp").exists());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("absent"));
        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.clear().unwrap(), 0);
        assert!(!store.remove("abc").unwrap());
    }
}
