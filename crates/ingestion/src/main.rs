//! RagForge Ingestion CLI
//!
//! Ingests already-parsed files and images into the configured vector index:
//! 1. Loads UTF-8 documents and image paths
//! 2. Chunks and embeds documents; describes, chunks, and embeds images
//! 3. Upserts vectors with chunk metadata
//! 4. Prints the job summaries as JSON

use anyhow::Context;
use clap::Parser;
use ragforge_common::config::{AppConfig, IndexProvider, Preset};
use ragforge_common::telemetry::init_tracing;
use ragforge_common::{metrics, CancellationToken, Services, VERSION};
use ragforge_ingestion::{load_paths, IngestionPipeline};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ingestion", version, about = "Ingest parsed documents and images into the vector index")]
struct Cli {
    /// Files or directories to ingest
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Configuration file (defaults to config/ layering plus APP__ env vars)
    #[arg(long)]
    config: Option<String>,

    /// Concurrency preset: low, medium, high
    #[arg(long)]
    preset: Option<Preset>,

    /// Derive worker counts and chunking from this host's core count
    #[arg(long, conflicts_with = "preset")]
    auto_tune: bool,
}

fn host_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load_from(cli.config.as_deref())
        .context("failed to load configuration")?;
    let config = match (cli.preset, cli.auto_tune) {
        (Some(preset), _) => config.with_preset(preset),
        (None, true) => config.with_derived_defaults(host_cores()),
        (None, false) => config,
    };

    init_tracing(&config.observability);
    metrics::register_metrics();
    info!("Starting RagForge ingestion v{}", VERSION);

    if config.index.provider == IndexProvider::Memory {
        warn!("Memory index selected; ingested vectors are discarded on exit");
    }

    let services = Services::from_config(&config)?;
    let embeddings = services.embedding_pipeline(&config);
    services.prepare_index(&embeddings, &config).await?;
    let pipeline = IngestionPipeline::new(embeddings, services.index.clone(), &config.pipeline)?;

    let sources = load_paths(&cli.paths).await?;
    if sources.is_empty() {
        warn!("Nothing to ingest");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing in-flight batches");
            on_signal.cancel();
        }
    });

    let mut jobs = Vec::new();
    if !sources.documents.is_empty() {
        jobs.push(pipeline.ingest_batch(sources.documents, &cancel).await?);
    }
    if !sources.images.is_empty() {
        jobs.push(pipeline.ingest_images(sources.images, &cancel).await?);
    }

    println!("{}", serde_json::to_string_pretty(&jobs)?);
    Ok(())
}
