//! RagForge Context CLI
//!
//! Interactive question answering:
//! - Ingests the given files and images into the configured index
//! - Reads questions from stdin and prints answers with citations
//! - `/history`, `/clear`, and `/quit` manage the conversation
//! - Serves Prometheus metrics when `observability.metrics_port` is set

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use ragforge_common::config::{AppConfig, ObservabilityConfig, Preset};
use ragforge_common::metrics::LATENCY_BUCKETS;
use ragforge_common::telemetry::init_tracing;
use ragforge_common::{metrics, Services, VERSION};
use ragforge_context::{ChatAnswer, ChatError, ChatSession};
use ragforge_ingestion::load_paths;
use ragforge_search::RetrievalError;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "context", version, about = "Chat with your documents")]
struct Cli {
    /// Files or directories to ingest before the first question
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

fn install_metrics_exporter(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        return Ok(());
    }
    let addr: SocketAddr = ([0, 0, 0, 0], config.metrics_port).into();
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .install()
        .context("failed to install Prometheus exporter")?;
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

fn print_answer(answer: &ChatAnswer) {
    println!("\n{}\n", answer.turn.answer);
    if !answer.turn.citations.is_empty() {
        println!("Sources:");
        for citation in &answer.turn.citations {
            println!("  [{}] {} (score {:.2})", citation.index, citation.source_name, citation.score);
        }
    }
    if !answer.context.uncited_documents.is_empty() {
        println!(
            "  (+{} more document(s) used in context but not cited)",
            answer.context.uncited_documents.len()
        );
    }
    println!();
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
    install_metrics_exporter(&config.observability)?;
    metrics::register_metrics();
    info!("Starting RagForge context v{}", VERSION);

    let services = Services::from_config(&config)?;
    services
        .prepare_index(&services.embedding_pipeline(&config), &config)
        .await?;
    let mut session = ChatSession::from_services(&services, &config)?;

    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; no new ingestion batches or searches will start");
            cancel.cancel();
        }
    });

    if !cli.paths.is_empty() {
        let sources = load_paths(&cli.paths).await?;
        if !sources.documents.is_empty() {
            let job = session.ingest_documents(sources.documents).await?;
            info!(job_id = %job.id, status = ?job.status, indexed = job.indexed.len(), failures = job.failures.len(), "Documents ingested");
        }
        if !sources.images.is_empty() {
            let job = session.ingest_images(sources.images).await?;
            info!(job_id = %job.id, status = ?job.status, indexed = job.indexed.len(), failures = job.failures.len(), "Images ingested");
        }
    }

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                session.clear_history();
                println!("History cleared.");
            }
            "/history" => {
                for (i, turn) in session.history().iter().enumerate() {
                    println!("{}. {}\n   {}", i + 1, turn.query, turn.answer);
                }
            }
            question => match session.ask(question).await {
                Ok(answer) => print_answer(&answer),
                Err(ChatError::Cancelled | ChatError::Retrieval(RetrievalError::Cancelled)) => {
                    println!("Session cancelled.");
                    break;
                }
                Err(ChatError::Generation(err)) => {
                    error!(error = %err, "Generation failed");
                    println!("Could not generate an answer: {}", err);
                }
                Err(err) => {
                    error!(error = %err, "Question failed");
                    println!("Error: {}", err);
                }
            },
        }
    }

    info!(turns = session.history().len(), "Session ended");
    Ok(())
}
