//! Cosine similarity between each embedding and its predecessor, across chunk boundaries.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::{concatenate, s, Array1, ArrayView1, ArrayView2, Axis};

use crate::embeddings::EmbeddingArray;
use crate::errors::{PipelineError, Result};
use crate::npy;
use crate::progress::PipelineObserver;

/// Default file the similarity binary writes.
pub const DEFAULT_SCORES_FILE: &str = "cos_simil_scores.npy";

/// `a · b / (‖a‖ ‖b‖)`. A zero-norm input yields NaN, as plain float division does.
pub fn cosine_similarity(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    let dot = a.dot(&b);
    let norms = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    dot / norms
}

/// Row-wise cosine similarity of two equally shaped matrices.
fn rowwise_cosine(left: ArrayView2<'_, f32>, right: ArrayView2<'_, f32>) -> Array1<f32> {
    let dots = (&left * &right).sum_axis(Axis(1));
    let left_norms = left.map_axis(Axis(1), |row| row.dot(&row).sqrt());
    let right_norms = right.map_axis(Axis(1), |row| row.dot(&row).sqrt());
    dots / (left_norms * right_norms)
}

/// Incremental sliding-window similarity over a chunked vector stream.
///
/// Keeps the last vector of the previous chunk so that the first vector of the
/// next chunk is compared with it. Output length is always the total number of
/// vectors pushed minus one.
#[derive(Debug, Default)]
pub struct SimilarityEngine {
    carry: Option<Array1<f32>>,
    scores: Vec<f32>,
    vectors: usize,
    chunks: usize,
}

impl SimilarityEngine {
    /// Creates an engine with no carry-over.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one score per vector in `chunk` that has a predecessor.
    pub fn push_chunk(&mut self, object: &str, chunk: ArrayView2<'_, f32>) -> Result<()> {
        let rows = chunk.nrows();
        self.chunks += 1;
        if rows == 0 {
            return Ok(());
        }
        let scores = match self.carry.as_ref() {
            None => rowwise_cosine(chunk.slice(s![..-1, ..]), chunk.slice(s![1.., ..])),
            Some(carry) => {
                if carry.len() != chunk.ncols() {
                    return Err(PipelineError::DimensionMismatch {
                        object: object.to_string(),
                        expected: carry.len(),
                        found: chunk.ncols(),
                    });
                }
                let head = carry.view().insert_axis(Axis(0));
                let previous = concatenate(Axis(0), &[head, chunk.slice(s![..-1, ..])])
                    .map_err(|err| PipelineError::malformed_array(object, err.to_string()))?;
                rowwise_cosine(previous.view(), chunk)
            }
        };
        self.scores.extend(scores.iter().copied());
        self.carry = Some(chunk.row(rows - 1).to_owned());
        self.vectors += rows;
        Ok(())
    }

    /// Feeds a whole embedding array.
    pub fn push(&mut self, array: &EmbeddingArray) -> Result<()> {
        self.push_chunk(array.object(), array.view())
    }

    /// Scores computed so far.
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    /// Vectors seen so far.
    pub fn vectors_seen(&self) -> usize {
        self.vectors
    }

    /// Chunks seen so far, including empty ones.
    pub fn chunks_seen(&self) -> usize {
        self.chunks
    }

    /// Finishes the run and returns the scores.
    pub fn finish(self) -> Vec<f32> {
        self.scores
    }
}

/// Drains `chunks` through a [`SimilarityEngine`], reporting progress to `observer`.
pub fn consecutive_similarities<I, O>(chunks: I, observer: &mut O) -> Result<Vec<f32>>
where
    I: IntoIterator<Item = Result<EmbeddingArray>>,
    O: PipelineObserver + ?Sized,
{
    let mut engine = SimilarityEngine::new();
    for chunk in chunks {
        let chunk = chunk?;
        engine.push(&chunk)?;
        observer.chunk_loaded(chunk.object(), chunk.rows(), engine.chunks_seen());
        observer.scores_computed(engine.chunks_seen(), engine.scores().len());
    }
    Ok(engine.finish())
}

/// Persists `scores` as a 1-D `<f4` `.npy` file of shape `(len,)`.
pub fn save_scores(path: &Path, scores: &[f32]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    npy::write_vector(&mut writer, scores)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use ndarray::{array, Array2};

    const TOLERANCE: f32 = 1e-6;

    fn stream() -> Array2<f32> {
        array![
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 1.0, 1.0],
            [-1.0, 0.5, 2.0],
            [3.0, 3.0, 3.0],
            [0.2, -0.4, 0.9],
        ]
    }

    fn reference(vectors: &Array2<f32>) -> Vec<f32> {
        (0..vectors.nrows() - 1)
            .map(|i| cosine_similarity(vectors.row(i), vectors.row(i + 1)))
            .collect()
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert!((a - e).abs() < TOLERANCE, "score {i}: {a} vs {e}");
        }
    }

    #[test]
    fn cosine_of_known_pairs() {
        let x = array![1.0f32, 0.0];
        let y = array![0.0f32, 2.0];
        let z = array![3.0f32, 0.0];
        assert!(cosine_similarity(x.view(), y.view()).abs() < TOLERANCE);
        assert!((cosine_similarity(x.view(), z.view()) - 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn zero_vector_yields_nan() {
        let zero = array![0.0f32, 0.0];
        let one = array![1.0f32, 0.0];
        assert!(cosine_similarity(zero.view(), one.view()).is_nan());
    }

    #[test]
    fn zero_rows_score_nan_within_a_chunk() {
        let mut engine = SimilarityEngine::new();
        engine
            .push_chunk("z.npy", array![[1.0f32, 0.0], [0.0, 0.0], [1.0, 1.0]].view())
            .expect("push");
        let scores = engine.finish();
        assert_eq!(scores.len(), 2);
        assert!(scores.iter().all(|score| score.is_nan()), "{scores:?}");
    }

    #[test]
    fn zero_carry_over_scores_nan_then_recovers() {
        let mut engine = SimilarityEngine::new();
        engine
            .push_chunk("a.npy", array![[1.0f32, 0.0], [0.0, 0.0]].view())
            .expect("first");
        engine
            .push_chunk("b.npy", array![[1.0f32, 0.0], [0.0, 1.0]].view())
            .expect("second");
        let scores = engine.finish();
        assert_eq!(scores.len(), 3);
        assert!(scores[0].is_nan());
        assert!(scores[1].is_nan(), "carry-over is the zero row");
        assert!(scores[2].abs() < TOLERANCE);
    }

    #[test]
    fn single_chunk_pairs_neighbours() {
        let vectors = stream();
        let mut engine = SimilarityEngine::new();
        engine.push_chunk("one.npy", vectors.view()).expect("push");
        let scores = engine.finish();
        assert_eq!(scores.len(), vectors.nrows() - 1);
        assert_close(&scores, &reference(&vectors));
    }

    #[test]
    fn chunk_boundaries_are_transparent() {
        let vectors = stream();
        let expected = reference(&vectors);
        for split in 1..vectors.nrows() {
            let mut engine = SimilarityEngine::new();
            engine
                .push_chunk("a.npy", vectors.slice(s![..split, ..]))
                .expect("first");
            engine
                .push_chunk("b.npy", vectors.slice(s![split.., ..]))
                .expect("second");
            assert_close(&engine.finish(), &expected);
        }
    }

    #[test]
    fn many_small_chunks_and_empty_ones() {
        let vectors = stream();
        let mut engine = SimilarityEngine::new();
        engine.push_chunk("0.npy", vectors.slice(s![..1, ..])).expect("push");
        engine.push_chunk("empty.npy", vectors.slice(s![..0, ..])).expect("push");
        for i in 1..vectors.nrows() {
            engine.push_chunk("n.npy", vectors.slice(s![i..i + 1, ..])).expect("push");
        }
        assert_eq!(engine.vectors_seen(), vectors.nrows());
        assert_close(&engine.finish(), &reference(&vectors));
    }

    #[test]
    fn single_vector_has_no_score() {
        let mut engine = SimilarityEngine::new();
        engine
            .push_chunk("one.npy", array![[1.0f32, 2.0]].view())
            .expect("push");
        assert!(engine.finish().is_empty());
    }

    #[test]
    fn carry_dimension_must_match() {
        let mut engine = SimilarityEngine::new();
        engine
            .push_chunk("a.npy", array![[1.0f32, 2.0], [3.0, 4.0]].view())
            .expect("push");
        let err = engine
            .push_chunk("b.npy", array![[1.0f32, 2.0, 3.0]].view())
            .expect_err("dimension change");
        assert!(matches!(err, PipelineError::DimensionMismatch { expected: 2, found: 3, .. }));
    }

    #[test]
    fn driver_consumes_embedding_arrays() {
        let vectors = stream();
        let chunks = vec![
            Ok(EmbeddingArray::new("a.npy", vectors.slice(s![..3, ..]).to_owned())),
            Ok(EmbeddingArray::new("b.npy", vectors.slice(s![3.., ..]).to_owned())),
        ];
        let scores = consecutive_similarities(chunks, &mut NoProgress).expect("scores");
        assert_close(&scores, &reference(&vectors));
    }

    #[test]
    fn driver_stops_on_first_error() {
        let chunks = vec![
            Ok(EmbeddingArray::new("a.npy", stream())),
            Err(PipelineError::not_found("b", "missing.npy")),
        ];
        let err = consecutive_similarities(chunks, &mut NoProgress).expect_err("missing");
        assert!(err.is_not_found());
    }

    #[test]
    fn saved_scores_have_flat_shape() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DEFAULT_SCORES_FILE);
        save_scores(&path, &[0.25, 0.5, 0.75]).expect("save");
        let bytes = std::fs::read(&path).expect("read");
        assert_eq!(
            npy::decode_vector("scores", &bytes).expect("decode"),
            vec![0.25f32, 0.5, 0.75]
        );
    }
}
