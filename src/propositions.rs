//! Lazy streaming of proposition text out of JSONL shards.

use std::fmt;

use serde::Deserialize;
use tracing::info;

use crate::debug_log;
use crate::errors::{PipelineError, Result};
use crate::storage::ObjectStore;

/// Snapshot directory of the factoid-wiki proposition shards.
pub const DEFAULT_SHARD_PREFIX: &str =
    "datasets/datasets--chentong00--factoid-wiki/snapshots/60bce4923950eab87192e276c9c5e5136234a760/data";
/// Number of shards the dataset is split into.
pub const DEFAULT_SHARD_COUNT: u32 = 1000;

/// Maps a shard index to its object key: `{prefix}/docs-{index:04}_of_{total:04}.jsonl`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextShardLayout {
    prefix: String,
    total: u32,
}

impl TextShardLayout {
    /// Creates a layout under `prefix` with `total` shards.
    pub fn new(prefix: impl Into<String>, total: u32) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            total,
        }
    }

    /// Object key of shard `index`.
    pub fn object_name(&self, index: u32) -> String {
        let file = format!("docs-{index:04}_of_{:04}.jsonl", self.total);
        if self.prefix.is_empty() {
            file
        } else {
            format!("{}/{file}", self.prefix)
        }
    }
}

impl Default for TextShardLayout {
    fn default() -> Self {
        Self::new(DEFAULT_SHARD_PREFIX, DEFAULT_SHARD_COUNT)
    }
}

/// Inclusive span of proposition lines: `(start_file, start_line)` through `(end_file, end_line)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextFileRange {
    /// First shard index.
    pub start_file: u32,
    /// First line (0-based) to emit from the first shard.
    pub start_line: usize,
    /// Last shard index.
    pub end_file: u32,
    /// Last line (0-based, inclusive) to emit from the last shard.
    pub end_line: usize,
}

impl TextFileRange {
    /// Builds a range, rejecting spans that run backwards.
    pub fn new(start_file: u32, start_line: usize, end_file: u32, end_line: usize) -> Result<Self> {
        if start_file > end_file {
            return Err(PipelineError::InvalidRange(format!(
                "start file {start_file} is after end file {end_file}"
            )));
        }
        if start_file == end_file && start_line > end_line {
            return Err(PipelineError::InvalidRange(format!(
                "start line {start_line} is after end line {end_line} in file {start_file}"
            )));
        }
        Ok(Self {
            start_file,
            start_line,
            end_file,
            end_line,
        })
    }

    /// Half-open line window `[lo, hi)` to emit from `file` holding `line_count` lines.
    ///
    /// The first file is cut at `start_line`, the last at `end_line`; a range
    /// inside one file applies both cuts to that file.
    pub fn window(&self, file: u32, line_count: usize) -> (usize, usize) {
        let lo = if file == self.start_file {
            self.start_line
        } else {
            0
        };
        let hi = if file == self.end_file {
            self.end_line.saturating_add(1)
        } else {
            line_count
        };
        let hi = hi.min(line_count);
        (lo.min(hi), hi)
    }
}

impl fmt::Display for TextFileRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "file {} (line {}) to file {} (line {})",
            self.start_file, self.start_line, self.end_file, self.end_line
        )
    }
}

/// One proposition and where it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropositionRecord {
    /// Shard index.
    pub file_index: u32,
    /// 0-based line within the shard.
    pub line_index: usize,
    /// Proposition text (the line's `contents` field).
    pub contents: String,
}

#[derive(Deserialize)]
struct ShardLine {
    contents: String,
}

/// Parses every line of a shard. Any malformed line fails the whole shard.
///
/// Lines are parsed from raw bytes, so invalid UTF-8 is a `Parse` error on
/// the line that carries it.
pub fn parse_shard(object: &str, bytes: &[u8]) -> Result<Vec<String>> {
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    if body.is_empty() {
        return Ok(Vec::new());
    }
    body.split(|byte| *byte == b'\n')
        .enumerate()
        .map(|(line, raw)| {
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            serde_json::from_slice::<ShardLine>(raw)
                .map(|parsed| parsed.contents)
                .map_err(|source| PipelineError::Parse {
                    object: object.to_string(),
                    line,
                    source,
                })
        })
        .collect()
}

/// Forward-only stream of proposition records across one or more shards.
///
/// Each shard is fetched once, in full, when the stream first needs it, and
/// dropped as soon as its window has been emitted.
pub struct PropositionStream<S> {
    store: S,
    bucket: String,
    layout: TextShardLayout,
    range: TextFileRange,
    next_file: Option<u32>,
    current: Option<ShardCursor>,
    exhausted: bool,
    emitted: usize,
}

struct ShardCursor {
    file_index: u32,
    line_index: usize,
    lines: std::vec::IntoIter<String>,
}

impl<S: ObjectStore> PropositionStream<S> {
    /// Prepares a stream over `range`. Nothing is fetched yet.
    pub fn open(store: S, bucket: &str, layout: TextShardLayout, range: TextFileRange) -> Self {
        info!(
            "loading proposition data from gs://{}: {}",
            bucket, range
        );
        Self {
            store,
            bucket: bucket.to_string(),
            layout,
            next_file: Some(range.start_file),
            range,
            current: None,
            exhausted: false,
            emitted: 0,
        }
    }

    /// Records emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    fn load_shard(&self, file_index: u32) -> Result<ShardCursor> {
        let object = self.layout.object_name(file_index);
        info!("loading JSONL file {:04} from gs://{}", file_index, self.bucket);
        let bytes = self.store.fetch(&self.bucket, &object)?;
        let mut lines = parse_shard(&object, &bytes)?;
        let total = lines.len();
        let (lo, hi) = self.range.window(file_index, total);
        lines.truncate(hi);
        lines.drain(..lo);
        info!(
            "loaded {} records from file {:04} (emitting lines {}..{})",
            total, file_index, lo, hi
        );
        debug_log!("{} records queued from {}", lines.len(), object);
        Ok(ShardCursor {
            file_index,
            line_index: lo,
            lines: lines.into_iter(),
        })
    }
}

impl<S: ObjectStore> Iterator for PropositionStream<S> {
    type Item = Result<PropositionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.exhausted {
                return None;
            }
            if let Some(cursor) = self.current.as_mut() {
                if let Some(contents) = cursor.lines.next() {
                    let record = PropositionRecord {
                        file_index: cursor.file_index,
                        line_index: cursor.line_index,
                        contents,
                    };
                    cursor.line_index += 1;
                    self.emitted += 1;
                    return Some(Ok(record));
                }
                self.current = None;
            }
            let end_file = self.range.end_file;
            let Some(file_index) = self.next_file.filter(|file| *file <= end_file) else {
                self.exhausted = true;
                info!(
                    "finished loading proposition data ({} records)",
                    self.emitted
                );
                return None;
            };
            self.next_file = file_index.checked_add(1);
            match self.load_shard(file_index) {
                Ok(cursor) => self.current = Some(cursor),
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

impl<S: ObjectStore> std::iter::FusedIterator for PropositionStream<S> {}
