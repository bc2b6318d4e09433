//! In-memory object store used for dry runs and tests.

use std::collections::BTreeMap;

use super::{matches_suffix, ObjectStore};
use crate::errors::{PipelineError, Result};

/// Bucket/object map held entirely in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    objects: BTreeMap<(String, String), Vec<u8>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an object.
    pub fn insert(&mut self, bucket: &str, object: &str, bytes: impl Into<Vec<u8>>) {
        self.objects
            .insert((bucket.to_string(), object.to_string()), bytes.into());
    }

    /// Number of stored objects across all buckets.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl ObjectStore for MemoryStore {
    fn fetch(&self, bucket: &str, object: &str) -> Result<Vec<u8>> {
        self.objects
            .get(&(bucket.to_string(), object.to_string()))
            .cloned()
            .ok_or_else(|| PipelineError::not_found(bucket, object))
    }

    fn list(&self, bucket: &str, suffixes: &[&str]) -> Result<Vec<String>> {
        Ok(self
            .objects
            .keys()
            .filter(|(b, name)| b == bucket && matches_suffix(name, suffixes))
            .map(|(_, name)| name.clone())
            .collect())
    }
}
