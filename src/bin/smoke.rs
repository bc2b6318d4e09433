use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use propvec::controls::{ChromaArgs, LogArgs};
use propvec::VectorSink;
use rand::Rng;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "propvec-smoke",
    about = "Check a Chroma server by writing pseudo-random vectors into a test collection"
)]
struct SmokeCli {
    /// Collection to write the test vectors into
    #[arg(long, default_value = "test_collection")]
    collection: String,

    /// Number of vectors to insert
    #[arg(long, default_value_t = 1000)]
    items: usize,

    /// Dimension of each vector
    #[arg(long, default_value_t = 384)]
    dimension: usize,

    /// Vectors per write call
    #[arg(long, default_value_t = 100)]
    batch_size: usize,

    #[command(flatten)]
    chroma: ChromaArgs,

    #[command(flatten)]
    log: LogArgs,
}

fn main() {
    let cli = SmokeCli::parse();
    if let Err(err) = propvec::telemetry::init("propvec-smoke", cli.log.log_dir()) {
        eprintln!("failed to set up logging: {err}");
    }
    if let Err(err) = run(&cli) {
        error!("smoke test failed: {:#}", err);
        process::exit(1);
    }
}

fn run(cli: &SmokeCli) -> Result<()> {
    anyhow::ensure!(cli.batch_size > 0, "batch size must be at least 1");
    let client = cli.chroma.client()?;
    let collections = client
        .list_collections()
        .with_context(|| format!("failed to list collections at {}", client.base_url()))?;
    info!("server has {} collections", collections.len());
    for existing in &collections {
        info!("  {} ({})", existing.name, existing.id);
    }

    let mut collection = client.get_or_create_collection(&cli.collection)?;
    let mut rng = rand::thread_rng();
    let mut written = 0usize;
    while written < cli.items {
        let size = cli.batch_size.min(cli.items - written);
        let ids: Vec<String> = (written..written + size).map(|i| i.to_string()).collect();
        let embeddings: Vec<Vec<f32>> = (0..size)
            .map(|_| (0..cli.dimension).map(|_| rng.gen::<f32>()).collect())
            .collect();
        let documents: Vec<String> = (written..written + size)
            .map(|i| format!("smoke test document {i}"))
            .collect();
        collection
            .add(&ids, &embeddings, &documents)
            .with_context(|| format!("write of items {}..{} failed", written, written + size))?;
        written += size;
        info!("inserted {}/{} test vectors", written, cli.items);
    }
    info!(
        "smoke test passed: {} vectors of dimension {} in {}",
        written,
        cli.dimension,
        collection.name()
    );
    Ok(())
}
