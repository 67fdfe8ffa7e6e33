//! RagForge Search CLI
//!
//! Expands a query into variants, runs the fused vector search, and prints
//! the variants and ranked chunks as JSON.

use anyhow::Context;
use clap::Parser;
use ragforge_common::config::{AppConfig, IndexProvider};
use ragforge_common::models::Query;
use ragforge_common::telemetry::init_tracing;
use ragforge_common::{metrics, CancellationToken, Services, VERSION};
use ragforge_search::{QueryEnhancer, RetrievalOrchestrator};
use serde_json::json;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "search", version, about = "Run a fused multi-variant search against the vector index")]
struct Cli {
    /// Question to search for
    query: String,

    /// Configuration file (defaults to config/ layering plus APP__ env vars)
    #[arg(long)]
    config: Option<String>,

    /// Number of query variants, including the verbatim query
    #[arg(long)]
    variants: Option<usize>,

    /// Fused results to return
    #[arg(long)]
    top_k: Option<usize>,

    /// Minimum fused similarity score
    #[arg(long)]
    threshold: Option<f32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load_from(cli.config.as_deref())
        .context("failed to load configuration")?;

    init_tracing(&config.observability);
    metrics::register_metrics();
    info!("Starting RagForge search v{}", VERSION);

    if config.index.provider == IndexProvider::Memory {
        warn!("Memory index selected; it starts empty in this process");
    }

    let retrieval = &config.retrieval;
    let variants = cli.variants.unwrap_or(retrieval.query_variants).max(1);
    let top_k = cli.top_k.unwrap_or(retrieval.top_k);
    let threshold = cli.threshold.unwrap_or(retrieval.score_threshold);

    let services = Services::from_config(&config)?;
    let embeddings = services.embedding_pipeline(&config);
    let enhancer = QueryEnhancer::from_config(retrieval, services.generator.clone());
    let orchestrator =
        RetrievalOrchestrator::new(embeddings, services.index.clone(), &config.pipeline);

    let query = Query::new(cli.query);
    let expanded = enhancer.expand(&query, variants).await;
    let results = orchestrator
        .search_fused(&expanded, top_k, threshold, &CancellationToken::new())
        .await?;

    let output = json!({
        "query": query,
        "variants": expanded,
        "results": results,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
