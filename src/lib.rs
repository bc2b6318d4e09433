#![warn(missing_docs)]
//! Core library for streaming proposition embeddings out of object storage,
//! pairing them with their source text, and loading both into a vector database.

pub mod chroma;
pub mod controls;
pub mod embeddings;
mod errors;
pub mod npy;
pub mod pairing;
pub mod parts;
pub mod progress;
pub mod propositions;
pub mod similarity;
pub mod storage;
pub mod telemetry;
pub mod uploader;

pub use chroma::{ChromaClient, ChromaCollection};
pub use embeddings::{
    EmbeddingArray, EmbeddingCatalog, EmbeddingFileRange, EmbeddingMarker, EmbeddingStream,
};
pub use errors::{PipelineError, Result, StreamSide};
pub use pairing::{AlignedItem, AlignedStream};
pub use parts::{PartMap, PartRanges};
pub use progress::{LogProgress, NoProgress, PipelineObserver};
pub use propositions::{PropositionRecord, PropositionStream, TextFileRange, TextShardLayout};
pub use similarity::{consecutive_similarities, cosine_similarity, SimilarityEngine};
pub use storage::{GcsStore, LocalStore, MemoryStore, ObjectStore};
pub use uploader::{Batch, BatchUploader, UploadSummary, VectorSink};

#[cfg(feature = "debug_logs")]
#[macro_export]
// Per-object fetch chatter, routed through `tracing::debug!`.
macro_rules! debug_log {
    ($($arg:tt)*) => {
        ::tracing::debug!($($arg)*);
    };
}
#[cfg(not(feature = "debug_logs"))]
#[macro_export]
// Compiled out entirely unless `debug_logs` is enabled.
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}
