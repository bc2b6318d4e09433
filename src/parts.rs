//! Part map: which embedding arrays and which text lines make up each upload part.
//!
//! ```json
//! {
//!   "7": {
//!     "embedding_files": [["1200000", "1249999"], ["1450000", "1499999"]],
//!     "text_files": [[120, 3], [149, 817]]
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::embeddings::{EmbeddingFileRange, EmbeddingMarker};
use crate::errors::{PipelineError, Result};
use crate::propositions::TextFileRange;

/// Both ranges of one part, validated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartRanges {
    /// Embedding arrays to stream.
    pub embedding: EmbeddingFileRange,
    /// Proposition lines to stream.
    pub text: TextFileRange,
}

#[derive(Clone, Debug, Deserialize)]
struct PartEntry {
    embedding_files: [(String, String); 2],
    text_files: [(u32, usize); 2],
}

/// Part id to ranges, as loaded from JSON.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct PartMap {
    parts: BTreeMap<String, PartEntry>,
}

impl PartMap {
    /// Parses the JSON document.
    pub fn parse(source: &str, text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| PipelineError::Parse {
            object: source.to_string(),
            line: err.line().saturating_sub(1),
            source: err,
        })
    }

    /// Reads and parses a part map file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&path.display().to_string(), &text)
    }

    /// Known part ids, sorted.
    pub fn part_ids(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }

    /// Number of parts.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether the map has no parts.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Resolves `part` into checked ranges.
    pub fn ranges(&self, part: &str) -> Result<PartRanges> {
        let entry = self
            .parts
            .get(part)
            .ok_or_else(|| PipelineError::Configuration(format!("unknown part {part:?}")))?;
        let [(start_a, start_b), (end_a, end_b)] = &entry.embedding_files;
        let embedding = EmbeddingFileRange::new(
            EmbeddingMarker::new(start_a.as_str(), start_b.as_str()),
            EmbeddingMarker::new(end_a.as_str(), end_b.as_str()),
        );
        let [(start_file, start_line), (end_file, end_line)] = entry.text_files;
        let text = TextFileRange::new(start_file, start_line, end_file, end_line)?;
        Ok(PartRanges { embedding, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MAP: &str = r#"{
        "0": {
            "embedding_files": [["0", "49999"], ["50000", "99999"]],
            "text_files": [[0, 0], [1, 41]]
        },
        "1": {
            "embedding_files": [["100000", "149999"], ["100000", "149999"]],
            "text_files": [[1, 42], [1, 900]]
        },
        "bad": {
            "embedding_files": [["a", "b"], ["c", "d"]],
            "text_files": [[5, 0], [4, 10]]
        }
    }"#;

    #[test]
    fn resolves_both_ranges() {
        let map = PartMap::parse("parts.json", MAP).expect("parse");
        assert_eq!(map.len(), 3);
        assert_eq!(map.part_ids().collect::<Vec<_>>(), vec!["0", "1", "bad"]);

        let ranges = map.ranges("0").expect("part 0");
        assert_eq!(
            ranges.embedding.start.object_name(),
            "embeddings/embeddings_0-49999.npy"
        );
        assert_eq!(
            ranges.embedding.end.object_name(),
            "embeddings/embeddings_50000-99999.npy"
        );
        assert_eq!(
            ranges.text,
            TextFileRange::new(0, 0, 1, 41).expect("range")
        );
    }

    #[test]
    fn unknown_part_is_configuration_error() {
        let map = PartMap::parse("parts.json", MAP).expect("parse");
        assert!(matches!(
            map.ranges("42"),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn reversed_text_range_is_rejected() {
        let map = PartMap::parse("parts.json", MAP).expect("parse");
        assert!(matches!(
            map.ranges("bad"),
            Err(PipelineError::InvalidRange(_))
        ));
    }

    #[test]
    fn malformed_json_reports_the_line() {
        let err = PartMap::parse("parts.json", "{\n  \"0\": {\"embedding_files\": 3}\n}")
            .expect_err("bad shape");
        match err {
            PipelineError::Parse { object, line, .. } => {
                assert_eq!(object, "parts.json");
                // `"embedding_files": 3` sits on the second line, index 1.
                assert_eq!(line, 1);
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("parts.json");
        fs::write(&path, MAP).expect("write");
        let map = PartMap::from_path(&path).expect("load");
        assert!(map.ranges("1").is_ok());
    }
}
