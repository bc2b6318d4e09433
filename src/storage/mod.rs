//! Object storage adapters the loaders fetch arrays and text shards through.

pub mod gcs;
pub mod local;
pub mod memory;

use crate::errors::Result;

pub use gcs::GcsStore;
pub use local::LocalStore;
pub use memory::MemoryStore;

/// Read-only view over a bucketed object store.
pub trait ObjectStore {
    /// Downloads the full object. Missing objects surface as `PipelineError::NotFound`.
    fn fetch(&self, bucket: &str, object: &str) -> Result<Vec<u8>>;

    /// Lists object names ending with any of `suffixes` (all objects when empty).
    ///
    /// Ordering is whatever the backend returns; callers needing a stable
    /// order sort the result themselves.
    fn list(&self, bucket: &str, suffixes: &[&str]) -> Result<Vec<String>>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for &S {
    fn fetch(&self, bucket: &str, object: &str) -> Result<Vec<u8>> {
        (**self).fetch(bucket, object)
    }

    fn list(&self, bucket: &str, suffixes: &[&str]) -> Result<Vec<String>> {
        (**self).list(bucket, suffixes)
    }
}

impl<S: ObjectStore + ?Sized> ObjectStore for Box<S> {
    fn fetch(&self, bucket: &str, object: &str) -> Result<Vec<u8>> {
        (**self).fetch(bucket, object)
    }

    fn list(&self, bucket: &str, suffixes: &[&str]) -> Result<Vec<String>> {
        (**self).list(bucket, suffixes)
    }
}

pub(crate) fn matches_suffix(name: &str, suffixes: &[&str]) -> bool {
    suffixes.is_empty() || suffixes.iter().any(|suffix| name.ends_with(suffix))
}
