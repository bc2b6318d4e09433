//! Logging setup for the binaries: stderr always, plus an optional per-run log file.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{PipelineError, Result};

/// `{bin}_{YYYYmmdd_HHMMSS}.log`.
pub fn log_file_name<Tz>(bin: &str, started: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("{bin}_{}.log", started.format("%Y%m%d_%H%M%S"))
}

/// Creates `log_dir` if needed and opens a fresh timestamped log file in it.
fn open_log_file(bin: &str, log_dir: &Path) -> io::Result<(File, PathBuf)> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(log_file_name(bin, &Local::now()));
    let file = File::create(&path)?;
    Ok((file, path))
}

/// Installs the global subscriber. `RUST_LOG` overrides the default `info` filter.
///
/// When `log_dir` is given every event is also written, without ANSI colours,
/// to a fresh timestamped file in it; the path of that file is returned. If
/// the file cannot be opened, logging continues on stderr alone and a warning
/// names the cause.
pub fn init(bin: &str, log_dir: Option<&Path>) -> Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let opened = log_dir.map(|dir| (dir, open_log_file(bin, dir)));
    let (file_layer, path, failure) = match opened {
        Some((_, Ok((file, path)))) => {
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file));
            (Some(layer), Some(path), None)
        }
        Some((dir, Err(err))) => (None, None, Some((dir, err))),
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|err| {
            PipelineError::Configuration(format!("failed to install log subscriber: {err}"))
        })?;
    if let Some((dir, err)) = failure {
        warn!(
            "cannot write run log under {}: {}; logging to stderr only",
            dir.display(),
            err
        );
    }
    Ok(path)
}
