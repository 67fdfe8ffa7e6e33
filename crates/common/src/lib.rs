//! RagForge Common Library
//!
//! Shared code for the RagForge pipeline crates:
//! - Configuration, presets, and host-derived defaults
//! - Error taxonomy
//! - Metrics and tracing setup
//! - Data model (documents, chunks, queries, context bundles)
//! - Rate-limited HTTP client with retry state machine
//! - Bounded batch scheduler
//! - Embedding pipeline, vector index, and generation clients

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod generation;
pub mod http;
pub mod index;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod services;
pub mod telemetry;

// Re-export commonly used types
pub use config::{derive_defaults, AppConfig, PipelineConfig, Preset, RetrievalConfig};
pub use embeddings::{EmbedInput, Embedder, EmbeddingPipeline, ImageDescriber, ImageRef};
pub use errors::{AppError, Result};
pub use generation::Generator;
pub use http::{Endpoint, RateLimitedClient};
pub use index::VectorIndex;
pub use scheduler::{BatchScheduler, CancellationToken};
pub use services::Services;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
