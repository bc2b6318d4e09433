//! Error taxonomy shared by the loaders, the similarity engine and the uploader.

use std::fmt;
use std::io;

use thiserror::Error;

/// Which side of an aligned stream ran dry first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamSide {
    /// The flattened embedding vectors.
    Embeddings,
    /// The proposition text records.
    Propositions,
}

impl fmt::Display for StreamSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSide::Embeddings => f.write_str("embedding stream"),
            StreamSide::Propositions => f.write_str("proposition stream"),
        }
    }
}

/// Failures raised anywhere in the load/align/upload pipeline.
///
/// None of these are retried; callers log them and abort the run.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum PipelineError {
    /// An object is absent from storage or from the catalog.
    #[error("object not found: gs://{bucket}/{object}")]
    NotFound { bucket: String, object: String },
    /// A JSON document or JSONL line failed to parse. `line` is 0-based.
    #[error("malformed JSON in {object} at line {line}: {source}")]
    Parse {
        object: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    /// An `.npy` payload could not be decoded.
    #[error("malformed array in {object}: {reason}")]
    MalformedArray { object: String, reason: String },
    /// An array disagrees with the embedding dimension seen so far.
    #[error("dimension mismatch in {object}: expected {expected}, found {found}")]
    DimensionMismatch {
        object: String,
        expected: usize,
        found: usize,
    },
    /// A text range runs backwards.
    #[error("invalid range: {0}")]
    InvalidRange(String),
    /// Bad flags, part ids or batch settings.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The vector database could not be reached.
    #[error("vector database unreachable at {endpoint}: {reason}")]
    Connectivity { endpoint: String, reason: String },
    /// The vector database answered with a non-success status.
    #[error("vector database {operation} failed ({status}): {body}")]
    Database {
        operation: &'static str,
        status: u16,
        body: String,
    },
    /// Any other storage failure.
    #[error("object storage failure for {object}: {reason}")]
    Storage { object: String, reason: String },
    /// One side of an aligned stream ran out before the other.
    #[error("{exhausted} ended early after {paired} paired records")]
    StreamMismatch {
        exhausted: StreamSide,
        paired: usize,
    },
    /// A batch write failed; earlier batches stay written.
    #[error("batch {batch} failed after {uploaded} records were uploaded: {source}")]
    BatchFailed {
        batch: usize,
        uploaded: usize,
        #[source]
        source: Box<PipelineError>,
    },
    /// Local file I/O.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PipelineError {
    pub(crate) fn not_found(bucket: &str, object: &str) -> Self {
        PipelineError::NotFound {
            bucket: bucket.to_string(),
            object: object.to_string(),
        }
    }

    pub(crate) fn malformed_array(object: &str, reason: impl Into<String>) -> Self {
        PipelineError::MalformedArray {
            object: object.to_string(),
            reason: reason.into(),
        }
    }

    /// True for the missing-object case, which callers sometimes report differently.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::NotFound { .. })
    }
}

/// Convenience alias used throughout the library.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
