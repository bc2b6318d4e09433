//! Progress reporting hooks. The pipeline calls these; it never branches on them.
//!
//! Shard loads are logged by the proposition stream itself and are not reported here.

use tracing::info;

/// Receives progress counters from the loaders, the similarity engine and the uploader.
///
/// Every method has an empty default so observers only implement what they display.
pub trait PipelineObserver {
    /// An embedding array was fetched and decoded.
    fn chunk_loaded(&mut self, _object: &str, _rows: usize, _chunks_so_far: usize) {}

    /// A batch was written; `total` counts every record written so far.
    fn batch_flushed(&mut self, _batch: usize, _size: usize, _total: usize) {}

    /// Similarity scores were appended for one chunk.
    fn scores_computed(&mut self, _chunk: usize, _scores_so_far: usize) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl PipelineObserver for NoProgress {}

/// Logs every event at `info` level, plus a milestone line every `milestone` chunks.
#[derive(Debug, Clone)]
pub struct LogProgress {
    milestone: usize,
    expected_chunks: Option<usize>,
}

impl LogProgress {
    /// Creates a logger. `expected_chunks` enables "n/total" chunk messages.
    pub fn new(expected_chunks: Option<usize>) -> Self {
        Self {
            milestone: 10,
            expected_chunks,
        }
    }

    /// Overrides how many chunks pass between milestone lines (minimum 1).
    pub fn with_milestone(mut self, milestone: usize) -> Self {
        self.milestone = milestone.max(1);
        self
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PipelineObserver for LogProgress {
    fn chunk_loaded(&mut self, object: &str, rows: usize, chunks_so_far: usize) {
        match self.expected_chunks {
            Some(total) => info!(
                "loaded embedding array {} ({} rows) [{}/{}]",
                object, rows, chunks_so_far, total
            ),
            None => info!(
                "loaded embedding array {} ({} rows) [{}]",
                object, rows, chunks_so_far
            ),
        }
        if chunks_so_far % self.milestone == 0 {
            info!("{} embedding arrays processed", chunks_so_far);
        }
    }

    fn batch_flushed(&mut self, batch: usize, size: usize, total: usize) {
        info!(
            "uploaded batch {} of {} records (total processed: {})",
            batch, size, total
        );
    }

    fn scores_computed(&mut self, chunk: usize, scores_so_far: usize) {
        if chunk % self.milestone == 0 {
            info!("{} similarity scores after {} arrays", scores_so_far, chunk);
        }
    }
}

impl<O: PipelineObserver + ?Sized> PipelineObserver for &mut O {
    fn chunk_loaded(&mut self, object: &str, rows: usize, chunks_so_far: usize) {
        (**self).chunk_loaded(object, rows, chunks_so_far)
    }

    fn batch_flushed(&mut self, batch: usize, size: usize, total: usize) {
        (**self).batch_flushed(batch, size, total)
    }

    fn scores_computed(&mut self, chunk: usize, scores_so_far: usize) {
        (**self).scores_computed(chunk, scores_so_far)
    }
}
