use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use propvec::controls::{LogArgs, StorageArgs};
use propvec::embeddings::EMBEDDING_SUFFIX;
use propvec::EmbeddingCatalog;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "propvec-catalog",
    about = "List embedding arrays in a bucket and write them, sorted, as a catalog file"
)]
struct CatalogCli {
    /// Only keep objects ending with one of these suffixes
    #[arg(long = "suffix", default_value = EMBEDDING_SUFFIX)]
    suffixes: Vec<String>,

    /// Catalog file to write
    #[arg(long, short, default_value = "embedding_files.txt")]
    output: PathBuf,

    #[command(flatten)]
    storage: StorageArgs,

    #[command(flatten)]
    log: LogArgs,
}

fn main() {
    let cli = CatalogCli::parse();
    if let Err(err) = propvec::telemetry::init("propvec-catalog", cli.log.log_dir()) {
        eprintln!("failed to set up logging: {err}");
    }
    if let Err(err) = run(&cli) {
        error!("catalog listing failed: {:#}", err);
        process::exit(1);
    }
}

fn run(cli: &CatalogCli) -> Result<()> {
    let store = cli.storage.open_store()?;
    let suffixes: Vec<&str> = cli.suffixes.iter().map(String::as_str).collect();
    let mut names = store
        .list(&cli.storage.bucket, &suffixes)
        .with_context(|| format!("failed to list gs://{}", cli.storage.bucket))?;
    names.sort();
    let catalog = EmbeddingCatalog::new(names);
    fs::write(&cli.output, catalog.to_text())
        .with_context(|| format!("failed to write {}", cli.output.display()))?;
    info!(
        "wrote {} object names to {}",
        catalog.len(),
        cli.output.display()
    );
    Ok(())
}
