//! Filesystem-backed object store: `{root}/{bucket}/{object}`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use super::{matches_suffix, ObjectStore};
use crate::errors::{PipelineError, Result};

/// Treats each directory under `root` as a bucket.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory holding the bucket directories.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, object: &str) -> PathBuf {
        self.root.join(bucket).join(object)
    }
}

impl ObjectStore for LocalStore {
    fn fetch(&self, bucket: &str, object: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, object);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(PipelineError::not_found(bucket, object))
            }
            Err(err) => Err(PipelineError::Storage {
                object: path.display().to_string(),
                reason: err.to_string(),
            }),
        }
    }

    fn list(&self, bucket: &str, suffixes: &[&str]) -> Result<Vec<String>> {
        let bucket_root = self.root.join(bucket);
        if !bucket_root.is_dir() {
            return Err(PipelineError::not_found(bucket, ""));
        }
        let mut names = Vec::new();
        for entry in WalkDir::new(&bucket_root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable entry under {}", bucket_root.display());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&bucket_root) else {
                continue;
            };
            let name = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if matches_suffix(&name, suffixes) {
                names.push(name);
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fetches_nested_objects_and_lists_with_slashes() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("vectors").join("embeddings");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(nested.join("a.npy"), b"abc").expect("write");
        fs::write(nested.join("notes.txt"), b"skip").expect("write");

        let store = LocalStore::new(dir.path());
        assert_eq!(
            store.fetch("vectors", "embeddings/a.npy").expect("fetch"),
            b"abc"
        );
        assert_eq!(
            store.list("vectors", &[".npy"]).expect("list"),
            vec!["embeddings/a.npy".to_string()]
        );
    }

    #[test]
    fn missing_file_maps_to_not_found() {
        let dir = tempdir().expect("tempdir");
        let store = LocalStore::new(dir.path());
        let err = store.fetch("vectors", "missing.npy").expect_err("missing");
        assert!(err.is_not_found(), "{err}");
    }
}
