//! Lazy loading of embedding arrays over a contiguous slice of the catalog.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use ndarray::{Array2, ArrayView1, ArrayView2};
use tracing::info;

use crate::debug_log;
use crate::errors::{PipelineError, Result};
use crate::npy;
use crate::storage::ObjectStore;

/// Directory and file-name template every embedding array follows.
pub const EMBEDDING_PREFIX: &str = "embeddings/embeddings_";
/// Extension of embedding arrays.
pub const EMBEDDING_SUFFIX: &str = ".npy";

/// One embedding array object, named by the first and last document id it covers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EmbeddingMarker {
    /// Id of the first document embedded in the array.
    pub start_id: String,
    /// Id of the last document embedded in the array.
    pub end_id: String,
}

impl EmbeddingMarker {
    /// Builds a marker from its two ids.
    pub fn new(start_id: impl Into<String>, end_id: impl Into<String>) -> Self {
        Self {
            start_id: start_id.into(),
            end_id: end_id.into(),
        }
    }

    /// Canonical object name, `embeddings/embeddings_{start_id}-{end_id}.npy`.
    pub fn object_name(&self) -> String {
        format!(
            "{EMBEDDING_PREFIX}{}-{}{EMBEDDING_SUFFIX}",
            self.start_id, self.end_id
        )
    }
}

impl fmt::Display for EmbeddingMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.start_id, self.end_id)
    }
}

/// Parses `START_ID,END_ID`.
impl FromStr for EmbeddingMarker {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s.split_once(',').ok_or_else(|| {
            PipelineError::Configuration(format!("marker {s:?} is not START_ID,END_ID"))
        })?;
        let (start, end) = (start.trim(), end.trim());
        if start.is_empty() || end.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "marker {s:?} has an empty id"
            )));
        }
        Ok(Self::new(start, end))
    }
}

/// Inclusive range of embedding arrays, first and last.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmbeddingFileRange {
    /// First array to load.
    pub start: EmbeddingMarker,
    /// Last array to load (inclusive).
    pub end: EmbeddingMarker,
}

impl EmbeddingFileRange {
    /// Creates a range from its two markers.
    pub fn new(start: EmbeddingMarker, end: EmbeddingMarker) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for EmbeddingFileRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start.object_name(), self.end.object_name())
    }
}

/// Ordered list of every embedding array object name.
///
/// Storage listings are unordered, so the order here is the one that matters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmbeddingCatalog {
    names: Vec<String>,
}

impl EmbeddingCatalog {
    /// Wraps an already ordered list of object names.
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Parses one object name per line; blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Self {
        let names = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self { names }
    }

    /// Reads a catalog file written by `propvec-catalog` (or by hand).
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| {
            PipelineError::Configuration(format!(
                "failed to read catalog {}: {err}",
                path.display()
            ))
        })?;
        Ok(Self::parse(&text))
    }

    /// Renders the catalog back into its line format.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for name in &self.names {
            out.push_str(name);
            out.push('\n');
        }
        out
    }

    /// Object names in catalog order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of catalogued arrays.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolves `range` to the inclusive run of object names it covers.
    ///
    /// A start name missing from the catalog, or an end name that never appears
    /// at or after the start, is reported as `NotFound` rather than an empty run.
    pub fn resolve(&self, bucket: &str, range: &EmbeddingFileRange) -> Result<&[String]> {
        let start_name = range.start.object_name();
        let end_name = range.end.object_name();
        let start = self
            .names
            .iter()
            .position(|name| *name == start_name)
            .ok_or_else(|| PipelineError::not_found(bucket, &start_name))?;
        let end = self.names[start..]
            .iter()
            .position(|name| *name == end_name)
            .map(|offset| start + offset)
            .ok_or_else(|| PipelineError::not_found(bucket, &end_name))?;
        Ok(&self.names[start..=end])
    }
}

/// One decoded embedding array: rows are vectors, columns the embedding dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingArray {
    object: String,
    data: Array2<f32>,
}

impl EmbeddingArray {
    /// Wraps a matrix loaded from `object`.
    pub fn new(object: impl Into<String>, data: Array2<f32>) -> Self {
        Self {
            object: object.into(),
            data,
        }
    }

    /// Decodes `.npy` bytes fetched from `object`.
    pub fn from_npy(object: &str, bytes: &[u8]) -> Result<Self> {
        Ok(Self::new(object, npy::decode_matrix(object, bytes)?))
    }

    /// Name of the object this array came from.
    pub fn object(&self) -> &str {
        &self.object
    }

    /// Number of vectors.
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    /// Embedding dimension.
    pub fn dimension(&self) -> usize {
        self.data.ncols()
    }

    /// Whether the array holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    /// Borrowed matrix view.
    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    /// Iterates the vectors in row order.
    pub fn vectors(&self) -> impl Iterator<Item = ArrayView1<'_, f32>> + '_ {
        self.data.rows().into_iter()
    }

    /// Consumes the array, returning the matrix.
    pub fn into_inner(self) -> Array2<f32> {
        self.data
    }
}

/// Forward-only stream of embedding arrays, one remote fetch per step.
///
/// Once every object has been yielded, or after the first error, the stream
/// stays exhausted.
pub struct EmbeddingStream<S> {
    store: S,
    bucket: String,
    pending: std::vec::IntoIter<String>,
    dimension: Option<usize>,
    yielded: usize,
    exhausted: bool,
}

impl<S: ObjectStore> EmbeddingStream<S> {
    /// Validates `range` against `catalog` and prepares the stream. Nothing is fetched yet.
    pub fn open(
        store: S,
        bucket: &str,
        catalog: &EmbeddingCatalog,
        range: &EmbeddingFileRange,
    ) -> Result<Self> {
        let names = catalog.resolve(bucket, range)?.to_vec();
        info!(
            "streaming {} embedding arrays from gs://{}: {}",
            names.len(),
            bucket,
            range
        );
        Ok(Self {
            store,
            bucket: bucket.to_string(),
            pending: names.into_iter(),
            dimension: None,
            yielded: 0,
            exhausted: false,
        })
    }

    /// Arrays still to be fetched.
    pub fn remaining(&self) -> usize {
        if self.exhausted {
            0
        } else {
            self.pending.len()
        }
    }

    /// Arrays yielded so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    fn load(&mut self, object: &str) -> Result<EmbeddingArray> {
        debug_log!("loading embedding file {}", object);
        let bytes = self.store.fetch(&self.bucket, object)?;
        let array = EmbeddingArray::from_npy(object, &bytes)?;
        match self.dimension {
            Some(expected) if expected != array.dimension() => {
                return Err(PipelineError::DimensionMismatch {
                    object: object.to_string(),
                    expected,
                    found: array.dimension(),
                })
            }
            Some(_) => {}
            None => self.dimension = Some(array.dimension()),
        }
        debug_log!("loaded embedding array with shape {:?}", array.view().dim());
        Ok(array)
    }
}

impl<S: ObjectStore> Iterator for EmbeddingStream<S> {
    type Item = Result<EmbeddingArray>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let Some(object) = self.pending.next() else {
            self.exhausted = true;
            return None;
        };
        let result = self.load(&object);
        match result {
            Ok(_) => self.yielded += 1,
            Err(_) => self.exhausted = true,
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}

impl<S: ObjectStore> std::iter::FusedIterator for EmbeddingStream<S> {}
