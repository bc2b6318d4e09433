use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use propvec::chroma::DEFAULT_COLLECTION;
use propvec::controls::{ChromaArgs, DatasetArgs, LogArgs, PartArgs, StorageArgs};
use propvec::uploader::DEFAULT_BATCH_SIZE;
use propvec::{BatchUploader, EmbeddingStream, LogProgress, PropositionStream};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "propvec-upload",
    about = "Upload one part of the proposition embeddings to Chroma"
)]
struct UploadCli {
    /// Part id to process, as keyed in the part map
    #[arg(long, alias = "part-number")]
    part: String,

    /// Collection to write into (created when missing)
    #[arg(long, env = "PROPVEC_COLLECTION", default_value = DEFAULT_COLLECTION)]
    collection: String,

    /// Records per write call
    #[arg(long, env = "PROPVEC_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    #[command(flatten)]
    chroma: ChromaArgs,

    #[command(flatten)]
    storage: StorageArgs,

    #[command(flatten)]
    dataset: DatasetArgs,

    #[command(flatten)]
    parts: PartArgs,

    #[command(flatten)]
    log: LogArgs,
}

fn main() {
    let cli = UploadCli::parse();
    match propvec::telemetry::init("propvec-upload", cli.log.log_dir()) {
        Ok(Some(path)) => info!("logging to {}", path.display()),
        Ok(None) => {}
        Err(err) => eprintln!("failed to set up logging: {err}"),
    }
    if let Err(err) = run(&cli) {
        error!("upload of part {} failed: {:#}", cli.part, err);
        process::exit(1);
    }
}

fn run(cli: &UploadCli) -> Result<()> {
    info!(
        "starting upload to Chroma: host={}, port={}, part={}",
        cli.chroma.host, cli.chroma.port, cli.part
    );
    let client = cli.chroma.client()?;
    client
        .heartbeat()
        .with_context(|| format!("Chroma at {} did not answer", client.base_url()))?;
    info!("connected to Chroma at {}", client.base_url());
    let collection = client
        .get_or_create_collection(&cli.collection)
        .with_context(|| format!("failed to open collection {}", cli.collection))?;

    let ranges = cli
        .parts
        .resolve(&cli.part)
        .with_context(|| format!("failed to resolve part {}", cli.part))?;
    info!(
        "processing part {}: embeddings {}, text {}",
        cli.part, ranges.embedding, ranges.text
    );
    let catalog = cli
        .dataset
        .load_catalog()
        .context("failed to load embedding catalog")?;
    let store = cli.storage.open_store()?;
    let embeddings = EmbeddingStream::open(
        &store,
        &cli.storage.bucket,
        &catalog,
        &ranges.embedding,
    )?;
    let expected_chunks = embeddings.remaining();
    let propositions = PropositionStream::open(
        &store,
        &cli.storage.bucket,
        cli.dataset.shard_layout(),
        ranges.text,
    );

    let mut uploader = BatchUploader::new(
        collection,
        cli.batch_size,
        LogProgress::new(Some(expected_chunks)),
    )?;
    let summary = uploader.upload(embeddings, propositions)?;
    info!(
        "part {} done: {} records in {} batches",
        cli.part, summary.records, summary.batches
    );
    Ok(())
}
