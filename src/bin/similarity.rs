use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::Parser;
use propvec::controls::{DatasetArgs, LogArgs, MarkerArgs, PartArgs, StorageArgs};
use propvec::similarity::{save_scores, DEFAULT_SCORES_FILE};
use propvec::{consecutive_similarities, EmbeddingStream, LogProgress};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "propvec-similarity",
    about = "Cosine similarity between consecutive embeddings over a range of arrays"
)]
struct SimilarityCli {
    /// Take the embedding range from this part of the part map
    #[arg(long, conflicts_with_all = ["start", "end"])]
    part: Option<String>,

    #[command(flatten)]
    markers: MarkerArgs,

    /// Where to write the scores
    #[arg(long, short, default_value = DEFAULT_SCORES_FILE)]
    output: PathBuf,

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
    let cli = SimilarityCli::parse();
    match propvec::telemetry::init("propvec-similarity", cli.log.log_dir()) {
        Ok(Some(path)) => info!("logging to {}", path.display()),
        Ok(None) => {}
        Err(err) => eprintln!("failed to set up logging: {err}"),
    }
    if let Err(err) = run(&cli) {
        error!("similarity run failed: {:#}", err);
        process::exit(1);
    }
}

fn run(cli: &SimilarityCli) -> Result<()> {
    let range = match (&cli.part, cli.markers.range()) {
        (Some(part), _) => {
            cli.parts
                .resolve(part)
                .with_context(|| format!("failed to resolve part {part}"))?
                .embedding
        }
        (None, Some(range)) => range,
        (None, None) => bail!("pass either --part or both --from and --to"),
    };
    let catalog = cli
        .dataset
        .load_catalog()
        .context("failed to load embedding catalog")?;
    let store = cli.storage.open_store()?;
    let stream = EmbeddingStream::open(&store, &cli.storage.bucket, &catalog, &range)?;
    let mut progress = LogProgress::new(Some(stream.remaining()));
    let scores = consecutive_similarities(stream, &mut progress)?;
    info!("computed {} similarity scores", scores.len());
    save_scores(&cli.output, &scores)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;
    info!("scores saved to {}", cli.output.display());
    Ok(())
}
