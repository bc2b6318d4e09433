//! Command-line argument groups shared by the binaries.
//!
//! Each group is flattened into a binary's own `Parser`, so the flag names
//! and `PROPVEC_*` environment variables are the same everywhere.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::embeddings::{EmbeddingCatalog, EmbeddingFileRange, EmbeddingMarker};
use crate::errors::{PipelineError, Result};
use crate::parts::{PartMap, PartRanges};
use crate::propositions::TextShardLayout;
use crate::storage::gcs::DEFAULT_GCS_ENDPOINT;
use crate::storage::{GcsStore, LocalStore, ObjectStore};

/// Bucket holding both the embedding arrays and the text shards.
pub const DEFAULT_BUCKET: &str = "proposition-vectors";

/// Where objects are read from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum StorageBackend {
    /// Google Cloud Storage JSON API.
    Gcs,
    /// A local directory with one subdirectory per bucket.
    Local,
}

/// Object storage flags.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Storage backend to read objects from
    #[arg(long, env = "PROPVEC_STORAGE", value_enum, default_value_t = StorageBackend::Gcs)]
    pub storage: StorageBackend,

    /// Bucket containing embeddings and text shards
    #[arg(long, env = "PROPVEC_BUCKET", default_value = DEFAULT_BUCKET)]
    pub bucket: String,

    /// Root directory for the local backend (buckets are subdirectories)
    #[arg(long, env = "PROPVEC_LOCAL_ROOT", default_value = ".")]
    pub local_root: PathBuf,

    /// GCS JSON API endpoint (emulators use their own)
    #[arg(long, env = "PROPVEC_GCS_ENDPOINT", default_value = DEFAULT_GCS_ENDPOINT)]
    pub gcs_endpoint: String,

    /// OAuth bearer token for GCS; omit for public buckets
    #[arg(long, env = "PROPVEC_GCS_TOKEN", hide_env_values = true)]
    pub gcs_token: Option<String>,

    /// Max seconds to wait for each storage request
    #[arg(long, env = "PROPVEC_TIMEOUT_SECS", default_value_t = 300)]
    pub timeout_secs: u64,
}

impl StorageArgs {
    /// Request timeout, at least one second.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Opens the selected backend.
    pub fn open_store(&self) -> Result<Box<dyn ObjectStore>> {
        match self.storage {
            StorageBackend::Gcs => Ok(Box::new(GcsStore::new(
                &self.gcs_endpoint,
                self.gcs_token.as_deref(),
                self.timeout(),
            )?)),
            StorageBackend::Local => {
                if !self.local_root.is_dir() {
                    return Err(PipelineError::Configuration(format!(
                        "local storage root {} is not a directory",
                        self.local_root.display()
                    )));
                }
                Ok(Box::new(LocalStore::new(&self.local_root)))
            }
        }
    }
}

/// Dataset layout flags: the embedding catalog and the text shard naming.
#[derive(Args, Debug, Clone)]
pub struct DatasetArgs {
    /// Ordered list of embedding array names, one per line
    #[arg(long, env = "PROPVEC_CATALOG", default_value = "embedding_files.txt")]
    pub catalog: PathBuf,

    /// Directory prefix of the JSONL text shards
    #[arg(long, env = "PROPVEC_SHARD_PREFIX", default_value = crate::propositions::DEFAULT_SHARD_PREFIX)]
    pub shard_prefix: String,

    /// Total shard count, as embedded in `docs-NNNN_of_TTTT.jsonl`
    #[arg(long, env = "PROPVEC_SHARD_COUNT", default_value_t = crate::propositions::DEFAULT_SHARD_COUNT)]
    pub shard_count: u32,
}

impl DatasetArgs {
    /// Loads the catalog file.
    pub fn load_catalog(&self) -> Result<EmbeddingCatalog> {
        EmbeddingCatalog::from_path(&self.catalog)
    }

    /// Shard naming for the proposition stream.
    pub fn shard_layout(&self) -> TextShardLayout {
        TextShardLayout::new(self.shard_prefix.clone(), self.shard_count)
    }
}

/// Part selection flags.
#[derive(Args, Debug, Clone)]
pub struct PartArgs {
    /// JSON file mapping part ids to embedding and text ranges
    #[arg(long, env = "PROPVEC_PARTS", default_value = "info_map.json")]
    pub parts: PathBuf,
}

impl PartArgs {
    /// Loads the part map and resolves `part`.
    pub fn resolve(&self, part: &str) -> Result<PartRanges> {
        PartMap::from_path(&self.parts)?.ranges(part)
    }
}

/// Embedding range given directly as two markers instead of a part.
#[derive(Args, Debug, Clone, Default)]
pub struct MarkerArgs {
    /// First embedding array, as START_ID,END_ID
    #[arg(long = "from", requires = "end")]
    pub start: Option<EmbeddingMarker>,

    /// Last embedding array (inclusive), as START_ID,END_ID
    #[arg(long = "to", requires = "start")]
    pub end: Option<EmbeddingMarker>,
}

impl MarkerArgs {
    /// The explicit range, when both markers were given.
    pub fn range(&self) -> Option<EmbeddingFileRange> {
        match (&self.start, &self.end) {
            (Some(start), Some(end)) => Some(EmbeddingFileRange::new(start.clone(), end.clone())),
            _ => None,
        }
    }
}

/// Vector database connection flags.
#[derive(Args, Debug, Clone)]
pub struct ChromaArgs {
    /// Chroma host address
    #[arg(long, env = "PROPVEC_CHROMA_HOST", default_value = "localhost")]
    pub host: String,

    /// Chroma port number
    #[arg(long, env = "PROPVEC_CHROMA_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Max seconds to wait for each database request
    #[arg(long, env = "PROPVEC_CHROMA_TIMEOUT_SECS", default_value_t = 300)]
    pub db_timeout_secs: u64,
}

impl ChromaArgs {
    /// Builds the client; no request is made yet.
    pub fn client(&self) -> Result<crate::chroma::ChromaClient> {
        crate::chroma::ChromaClient::new(
            &self.host,
            self.port,
            Duration::from_secs(self.db_timeout_secs.max(1)),
        )
    }
}

/// Log output flags.
#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Directory for the timestamped run log
    #[arg(long, env = "PROPVEC_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Log to stderr only
    #[arg(long, default_value_t = false)]
    pub no_log_file: bool,
}

impl LogArgs {
    /// Directory to write the run log into, unless file logging is off.
    pub fn log_dir(&self) -> Option<&std::path::Path> {
        (!self.no_log_file).then_some(self.log_dir.as_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        storage: StorageArgs,
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        markers: MarkerArgs,
        #[command(flatten)]
        chroma: ChromaArgs,
    }

    #[test]
    fn defaults_point_at_the_public_dataset() {
        let cli = TestCli::try_parse_from(["test"]).expect("parse");
        assert_eq!(cli.storage.storage, StorageBackend::Gcs);
        assert_eq!(cli.storage.bucket, DEFAULT_BUCKET);
        assert_eq!(cli.storage.timeout(), Duration::from_secs(300));
        assert_eq!(cli.dataset.shard_layout(), TextShardLayout::default());
        assert_eq!(cli.chroma.host, "localhost");
        assert_eq!(cli.chroma.port, 8000);
        assert!(cli.markers.range().is_none());
    }

    #[test]
    fn markers_parse_as_a_pair() {
        let cli = TestCli::try_parse_from(["test", "--from", "0,49999", "--to", "50000,99999"])
            .expect("parse");
        let range = cli.markers.range().expect("range");
        assert_eq!(range.start, EmbeddingMarker::new("0", "49999"));
        assert_eq!(range.end, EmbeddingMarker::new("50000", "99999"));
    }

    #[test]
    fn a_lone_marker_is_rejected() {
        assert!(TestCli::try_parse_from(["test", "--from", "0,49999"]).is_err());
        assert!(TestCli::try_parse_from(["test", "--from", "nocomma", "--to", "1,2"]).is_err());
    }

    #[test]
    fn local_backend_requires_an_existing_root() {
        let cli = TestCli::try_parse_from([
            "test",
            "--storage",
            "local",
            "--local-root",
            "/definitely/not/here",
        ])
        .expect("parse");
        assert!(matches!(
            cli.storage.open_store(),
            Err(PipelineError::Configuration(_))
        ));
    }
}
