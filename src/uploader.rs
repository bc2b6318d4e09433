//! Fixed-size batching of aligned (id, vector, document) triples into a vector database.

use tracing::{error, info};

use crate::embeddings::EmbeddingArray;
use crate::errors::{PipelineError, Result};
use crate::pairing::{AlignedItem, AlignedStream};
use crate::progress::PipelineObserver;
use crate::propositions::PropositionRecord;

/// Batch size used by the upload binary unless overridden.
pub const DEFAULT_BATCH_SIZE: usize = 2500;

/// Destination for flushed batches.
pub trait VectorSink {
    /// Writes one batch. The three slices always have equal length.
    fn add(&mut self, ids: &[String], embeddings: &[Vec<f32>], documents: &[String]) -> Result<()>;
}

impl<T: VectorSink + ?Sized> VectorSink for &mut T {
    fn add(&mut self, ids: &[String], embeddings: &[Vec<f32>], documents: &[String]) -> Result<()> {
        (**self).add(ids, embeddings, documents)
    }
}

/// Accumulator for up to `capacity` records.
#[derive(Debug)]
pub struct Batch {
    capacity: usize,
    ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    documents: Vec<String>,
}

impl Batch {
    /// Creates an empty batch that reports full at `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ids: Vec::with_capacity(capacity),
            embeddings: Vec::with_capacity(capacity),
            documents: Vec::with_capacity(capacity),
        }
    }

    /// Adds one record.
    pub fn push(&mut self, id: String, embedding: Vec<f32>, document: String) {
        debug_assert!(self.ids.len() < self.capacity, "batch overfilled");
        self.ids.push(id);
        self.embeddings.push(embedding);
        self.documents.push(document);
    }

    /// Records currently held.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether the batch has reached its capacity.
    pub fn is_full(&self) -> bool {
        self.ids.len() >= self.capacity
    }

    /// Sends the held records to `sink`, then clears the batch (only on success).
    pub fn flush_into<S: VectorSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }
        sink.add(&self.ids, &self.embeddings, &self.documents)?;
        let flushed = self.len();
        self.ids.clear();
        self.embeddings.clear();
        self.documents.clear();
        Ok(flushed)
    }
}

/// Totals for a completed upload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Records written.
    pub records: usize,
    /// Write calls made.
    pub batches: usize,
}

/// Pairs the two streams, numbers the records from 0 and writes them in batches.
pub struct BatchUploader<S, O> {
    sink: S,
    batch_size: usize,
    observer: O,
}

impl<S: VectorSink, O: PipelineObserver> BatchUploader<S, O> {
    /// Creates an uploader writing `batch_size` records per call.
    pub fn new(sink: S, batch_size: usize, observer: O) -> Result<Self> {
        if batch_size == 0 {
            return Err(PipelineError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            sink,
            batch_size,
            observer,
        })
    }

    /// Configured batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns the sink, e.g. to inspect what was written.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Streams every pair into the sink.
    ///
    /// A full batch is flushed as soon as it fills; the remainder is flushed
    /// once both sources are exhausted. The first error aborts the run; nothing
    /// written before it is rolled back.
    pub fn upload<E, P>(&mut self, embeddings: E, propositions: P) -> Result<UploadSummary>
    where
        E: IntoIterator<Item = Result<EmbeddingArray>>,
        P: IntoIterator<Item = Result<PropositionRecord>>,
    {
        info!("using batch size: {}", self.batch_size);
        let mut batch = Batch::with_capacity(self.batch_size);
        let mut summary = UploadSummary::default();
        let mut aligned = AlignedStream::new(embeddings, propositions, &mut self.observer);

        while let Some(item) = aligned.next() {
            let AlignedItem {
                index,
                vector,
                record,
            } = item.map_err(|err| {
                error!(
                    "pipeline stopped after {} paired records ({} batches, {} records uploaded): {}",
                    summary.records + batch.len(),
                    summary.batches,
                    summary.records,
                    err
                );
                err
            })?;
            batch.push(index.to_string(), vector, record.contents);
            if batch.is_full() {
                let size = flush(&mut batch, &mut self.sink, &mut summary)?;
                aligned
                    .observer_mut()
                    .batch_flushed(summary.batches, size, summary.records);
            }
        }
        if !batch.is_empty() {
            info!(
                "uploading final batch of {} items (total processed: {})",
                batch.len(),
                summary.records + batch.len()
            );
            let size = flush(&mut batch, &mut self.sink, &mut summary)?;
            aligned
                .observer_mut()
                .batch_flushed(summary.batches, size, summary.records);
        }
        info!(
            "upload completed: {} records in {} batches from {} embedding arrays",
            summary.records,
            summary.batches,
            aligned.chunks_loaded()
        );
        Ok(summary)
    }
}

fn flush<S: VectorSink + ?Sized>(
    batch: &mut Batch,
    sink: &mut S,
    summary: &mut UploadSummary,
) -> Result<usize> {
    let batch_no = summary.batches + 1;
    match batch.flush_into(sink) {
        Ok(flushed) => {
            summary.batches = batch_no;
            summary.records += flushed;
            Ok(flushed)
        }
        Err(source) => {
            error!(
                "batch {} failed after {} records were uploaded: {}",
                batch_no, summary.records, source
            );
            Err(PipelineError::BatchFailed {
                batch: batch_no,
                uploaded: summary.records,
                source: Box::new(source),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StreamSide;
    use crate::progress::NoProgress;
    use ndarray::Array2;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct RecordingSink {
        calls: Vec<(Vec<String>, Vec<Vec<f32>>, Vec<String>)>,
        fail_on_call: Option<usize>,
    }

    impl VectorSink for RecordingSink {
        fn add(
            &mut self,
            ids: &[String],
            embeddings: &[Vec<f32>],
            documents: &[String],
        ) -> Result<()> {
            if self.fail_on_call == Some(self.calls.len() + 1) {
                return Err(PipelineError::Database {
                    operation: "add",
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            self.calls
                .push((ids.to_vec(), embeddings.to_vec(), documents.to_vec()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        chunks: usize,
        flushes: Vec<(usize, usize, usize)>,
    }

    impl PipelineObserver for CountingObserver {
        fn chunk_loaded(&mut self, _object: &str, _rows: usize, _chunks_so_far: usize) {
            self.chunks += 1;
        }

        fn batch_flushed(&mut self, batch: usize, size: usize, total: usize) {
            self.flushes.push((batch, size, total));
        }
    }

    /// Splits `total` vectors over uneven chunks so batch and chunk boundaries never line up.
    fn embeddings(total: usize) -> Vec<Result<EmbeddingArray>> {
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut size = 1;
        while start < total {
            let rows = size.min(total - start);
            chunks.push(Ok(EmbeddingArray::new(
                format!("chunk-{start}.npy"),
                Array2::from_shape_fn((rows, 2), |(r, _)| (start + r) as f32),
            )));
            start += rows;
            size += 2;
        }
        chunks
    }

    fn propositions(total: usize) -> Vec<Result<PropositionRecord>> {
        (0..total)
            .map(|i| {
                Ok(PropositionRecord {
                    file_index: (i / 10) as u32,
                    line_index: i % 10,
                    contents: format!("doc {i}"),
                })
            })
            .collect()
    }

    #[test]
    fn two_full_batches_and_a_remainder() {
        let batch_size = 8;
        let total = 2 * batch_size + 7;
        let mut observer = CountingObserver::default();
        let mut uploader =
            BatchUploader::new(RecordingSink::default(), batch_size, &mut observer).expect("new");
        let summary = uploader
            .upload(embeddings(total), propositions(total))
            .expect("upload");
        assert_eq!(
            summary,
            UploadSummary {
                records: total,
                batches: 3
            }
        );
        let sink = uploader.into_sink();
        let sizes: Vec<usize> = sink.calls.iter().map(|(ids, _, _)| ids.len()).collect();
        assert_eq!(sizes, vec![8, 8, 7]);

        let ids: Vec<String> = sink
            .calls
            .iter()
            .flat_map(|(ids, _, _)| ids.iter().cloned())
            .collect();
        let expected: Vec<String> = (0..total).map(|i| i.to_string()).collect();
        assert_eq!(ids, expected);

        for (ids, vectors, documents) in &sink.calls {
            for ((id, vector), document) in ids.iter().zip(vectors).zip(documents) {
                let n: usize = id.parse().expect("numeric id");
                assert_eq!(vector[0], n as f32);
                assert_eq!(*document, format!("doc {n}"));
            }
        }
        assert_eq!(observer.flushes, vec![(1, 8, 8), (2, 8, 16), (3, 7, 23)]);
        assert!(observer.chunks > 1);
    }

    #[test]
    fn exact_multiple_makes_no_empty_final_call() {
        let mut uploader =
            BatchUploader::new(RecordingSink::default(), 5, NoProgress).expect("new");
        let summary = uploader
            .upload(embeddings(10), propositions(10))
            .expect("upload");
        assert_eq!(summary.batches, 2);
        assert_eq!(uploader.into_sink().calls.len(), 2);
    }

    #[test]
    fn empty_streams_make_no_calls() {
        let mut uploader =
            BatchUploader::new(RecordingSink::default(), 5, NoProgress).expect("new");
        let summary = uploader
            .upload(Vec::new(), Vec::new())
            .expect("upload");
        assert_eq!(summary, UploadSummary::default());
        assert!(uploader.into_sink().calls.is_empty());
    }

    #[test]
    fn fewer_propositions_than_vectors_fails() {
        let mut uploader =
            BatchUploader::new(RecordingSink::default(), 4, NoProgress).expect("new");
        let err = uploader
            .upload(embeddings(10), propositions(9))
            .expect_err("mismatch");
        assert!(matches!(
            err,
            PipelineError::StreamMismatch {
                exhausted: StreamSide::Propositions,
                paired: 9
            }
        ));
        // The two full batches went out before the mismatch surfaced; the partial one did not.
        assert_eq!(uploader.into_sink().calls.len(), 2);
    }

    #[test]
    fn more_propositions_than_vectors_fails() {
        let mut uploader =
            BatchUploader::new(RecordingSink::default(), 4, NoProgress).expect("new");
        let err = uploader
            .upload(embeddings(3), propositions(4))
            .expect_err("mismatch");
        assert!(matches!(
            err,
            PipelineError::StreamMismatch {
                exhausted: StreamSide::Embeddings,
                paired: 3
            }
        ));
    }

    #[test]
    fn failed_write_reports_batch_and_progress() {
        let sink = RecordingSink {
            fail_on_call: Some(2),
            ..RecordingSink::default()
        };
        let mut uploader = BatchUploader::new(sink, 3, NoProgress).expect("new");
        let err = uploader
            .upload(embeddings(9), propositions(9))
            .expect_err("write failure");
        match err {
            PipelineError::BatchFailed {
                batch,
                uploaded,
                source,
            } => {
                assert_eq!(batch, 2);
                assert_eq!(uploaded, 3);
                assert!(matches!(*source, PipelineError::Database { status: 503, .. }));
            }
            other => panic!("expected BatchFailed, got {other:?}"),
        }
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(matches!(
            BatchUploader::new(RecordingSink::default(), 0, NoProgress),
            Err(PipelineError::Configuration(_))
        ));
    }
}
