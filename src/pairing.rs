//! Explicit one-to-one pairing of flattened embedding vectors with proposition records.
//!
//! Neither source carries a key the other can be checked against, so the only
//! thing enforced here is that both run out together: the first pull where
//! exactly one side is exhausted fails with `StreamMismatch`.

use std::iter::Fuse;

use ndarray::Array2;

use crate::embeddings::EmbeddingArray;
use crate::errors::{PipelineError, Result, StreamSide};
use crate::progress::PipelineObserver;
use crate::propositions::PropositionRecord;

/// One vector and the proposition it was computed from.
#[derive(Clone, Debug, PartialEq)]
pub struct AlignedItem {
    /// Position in the combined stream, starting at 0.
    pub index: usize,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Matching proposition.
    pub record: PropositionRecord,
}

struct OpenChunk {
    data: Array2<f32>,
    next_row: usize,
}

/// Pulls one vector and one record per step and checks the two sources end together.
pub struct AlignedStream<E, P, O>
where
    E: Iterator<Item = Result<EmbeddingArray>>,
    P: Iterator<Item = Result<PropositionRecord>>,
{
    embeddings: Fuse<E>,
    propositions: Fuse<P>,
    observer: O,
    chunk: Option<OpenChunk>,
    chunks_loaded: usize,
    paired: usize,
    finished: bool,
}

impl<E, P, O> AlignedStream<E, P, O>
where
    E: Iterator<Item = Result<EmbeddingArray>>,
    P: Iterator<Item = Result<PropositionRecord>>,
    O: PipelineObserver,
{
    /// Pairs `embeddings` with `propositions`, reporting each loaded chunk to `observer`.
    pub fn new<IE, IP>(embeddings: IE, propositions: IP, observer: O) -> Self
    where
        IE: IntoIterator<IntoIter = E>,
        IP: IntoIterator<IntoIter = P>,
    {
        Self {
            embeddings: embeddings.into_iter().fuse(),
            propositions: propositions.into_iter().fuse(),
            observer,
            chunk: None,
            chunks_loaded: 0,
            paired: 0,
            finished: false,
        }
    }

    /// Pairs produced so far.
    pub fn paired(&self) -> usize {
        self.paired
    }

    /// Embedding arrays pulled so far.
    pub fn chunks_loaded(&self) -> usize {
        self.chunks_loaded
    }

    /// Observer receiving chunk events; callers report their own events through it too.
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    fn next_vector(&mut self) -> Option<Result<Vec<f32>>> {
        loop {
            if let Some(chunk) = self.chunk.as_mut() {
                if chunk.next_row < chunk.data.nrows() {
                    let row = chunk.data.row(chunk.next_row).to_vec();
                    chunk.next_row += 1;
                    return Some(Ok(row));
                }
                self.chunk = None;
            }
            match self.embeddings.next()? {
                Ok(array) => {
                    self.chunks_loaded += 1;
                    self.observer
                        .chunk_loaded(array.object(), array.rows(), self.chunks_loaded);
                    self.chunk = Some(OpenChunk {
                        data: array.into_inner(),
                        next_row: 0,
                    });
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }

    fn mismatch(&mut self, exhausted: StreamSide) -> PipelineError {
        self.finished = true;
        PipelineError::StreamMismatch {
            exhausted,
            paired: self.paired,
        }
    }
}

impl<E, P, O> Iterator for AlignedStream<E, P, O>
where
    E: Iterator<Item = Result<EmbeddingArray>>,
    P: Iterator<Item = Result<PropositionRecord>>,
    O: PipelineObserver,
{
    type Item = Result<AlignedItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let vector = match self.next_vector() {
            Some(Ok(vector)) => Some(vector),
            Some(Err(err)) => {
                self.finished = true;
                return Some(Err(err));
            }
            None => None,
        };
        let record = match self.propositions.next() {
            Some(Ok(record)) => Some(record),
            Some(Err(err)) => {
                self.finished = true;
                return Some(Err(err));
            }
            None => None,
        };
        match (vector, record) {
            (Some(vector), Some(record)) => {
                let index = self.paired;
                self.paired += 1;
                Some(Ok(AlignedItem {
                    index,
                    vector,
                    record,
                }))
            }
            (Some(_), None) => Some(Err(self.mismatch(StreamSide::Propositions))),
            (None, Some(_)) => Some(Err(self.mismatch(StreamSide::Embeddings))),
            (None, None) => {
                self.finished = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;

    fn chunk(name: &str, rows: usize, offset: usize) -> Result<EmbeddingArray> {
        Ok(EmbeddingArray::new(
            name,
            Array2::from_shape_fn((rows, 2), |(r, c)| (offset + r) as f32 + c as f32 / 10.0),
        ))
    }

    fn records(count: usize) -> Vec<Result<PropositionRecord>> {
        (0..count)
            .map(|i| {
                Ok(PropositionRecord {
                    file_index: 0,
                    line_index: i,
                    contents: format!("p{i}"),
                })
            })
            .collect()
    }

    #[test]
    fn pairs_rows_in_chunk_then_row_order() {
        let embeddings = vec![chunk("a", 2, 0), chunk("b", 0, 2), chunk("c", 3, 2)];
        let items: Vec<AlignedItem> = AlignedStream::new(embeddings, records(5), NoProgress)
            .map(|item| item.expect("pair"))
            .collect();
        assert_eq!(items.len(), 5);
        for (i, item) in items.iter().enumerate() {
            assert_eq!(item.index, i);
            assert_eq!(item.vector[0], i as f32);
            assert_eq!(item.record.contents, format!("p{i}"));
        }
    }

    #[test]
    fn short_proposition_stream_is_a_mismatch() {
        let embeddings = vec![chunk("a", 3, 0)];
        let results: Vec<_> = AlignedStream::new(embeddings, records(2), NoProgress).collect();
        assert_eq!(results.len(), 3);
        match &results[2] {
            Err(PipelineError::StreamMismatch { exhausted, paired }) => {
                assert_eq!(*exhausted, StreamSide::Propositions);
                assert_eq!(*paired, 2);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn short_embedding_stream_is_a_mismatch() {
        let embeddings = vec![chunk("a", 1, 0)];
        let mut stream = AlignedStream::new(embeddings, records(2), NoProgress);
        assert!(stream.next().expect("first").is_ok());
        let err = stream.next().expect("second").expect_err("mismatch");
        assert!(matches!(
            err,
            PipelineError::StreamMismatch {
                exhausted: StreamSide::Embeddings,
                paired: 1
            }
        ));
        assert!(stream.next().is_none());
    }

    #[test]
    fn source_errors_pass_through_and_stop() {
        let embeddings = vec![chunk("a", 1, 0), Err(PipelineError::not_found("b", "x.npy"))];
        let mut stream = AlignedStream::new(embeddings, records(4), NoProgress);
        assert!(stream.next().expect("first").is_ok());
        assert!(stream.next().expect("second").expect_err("fetch").is_not_found());
        assert!(stream.next().is_none());
    }
}
