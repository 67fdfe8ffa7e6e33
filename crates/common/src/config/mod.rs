//! Configuration management for RagForge pipelines
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml)
//! - Default values
//!
//! Configuration values are immutable once built. Applying a preset produces
//! a new `PipelineConfig`; nothing mutates shared process state.

use crate::errors::ConfigError;
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Concurrency, batching, and chunking parameters
    pub pipeline: PipelineConfig,

    /// Query-time retrieval and assembly parameters
    pub retrieval: RetrievalConfig,

    /// Outbound HTTP client behaviour
    pub http: HttpConfig,

    /// Embedding, vision, and generation service endpoints
    pub services: ServicesConfig,

    /// Vector index selection
    pub index: IndexConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

/// Text chunking strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Fixed character window with exact overlap
    #[default]
    SlidingWindow,
    /// Boundary-aware splitting (paragraphs, sentences, words)
    Semantic,
}

/// The named pipeline parameters operators tune per host.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct PipelineConfig {
    /// EMBEDDING_MAX_WORKERS
    #[validate(range(min = 1))]
    pub embedding_max_workers: usize,

    /// EMBEDDING_BATCH_SIZE
    #[validate(range(min = 1))]
    pub embedding_batch_size: usize,

    /// DOC_PROCESSING_MAX_WORKERS
    #[validate(range(min = 1))]
    pub doc_processing_max_workers: usize,

    /// IMAGE_MAX_WORKERS
    #[validate(range(min = 1))]
    pub image_max_workers: usize,

    /// Upper bound on concurrent vector searches per query
    #[validate(range(min = 1))]
    pub query_max_workers: usize,

    /// Concurrent vector index upserts during ingestion
    #[validate(range(min = 1))]
    pub index_max_workers: usize,

    /// CHUNK_SIZE in characters
    #[validate(range(min = 1))]
    pub chunk_size: usize,

    /// CHUNK_OVERLAP in characters
    pub chunk_overlap: usize,

    pub chunking_strategy: ChunkingStrategy,

    /// L2-normalize ingestion and query embeddings
    pub normalize_embeddings: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            embedding_max_workers: 8,
            embedding_batch_size: 20,
            doc_processing_max_workers: 4,
            image_max_workers: 4,
            query_max_workers: 4,
            index_max_workers: 8,
            chunk_size: 300,
            chunk_overlap: 100,
            chunking_strategy: ChunkingStrategy::SlidingWindow,
            normalize_embeddings: true,
        }
    }
}

/// Performance presets for different host capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Low,
    Medium,
    High,
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Preset::Low),
            "medium" => Ok(Preset::Medium),
            "high" => Ok(Preset::High),
            _ => Err(ConfigError::UnknownPreset { name: s.to_string() }),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Preset::Low => "low",
            Preset::Medium => "medium",
            Preset::High => "high",
        };
        f.write_str(name)
    }
}

impl PipelineConfig {
    /// Build a configuration from a preset, other fields at their defaults
    pub fn preset(preset: Preset) -> Self {
        Self::default().with_preset(preset)
    }

    /// Return a copy with every preset-controlled parameter replaced
    pub fn with_preset(self, preset: Preset) -> Self {
        let (embed_workers, embed_batch, doc_workers, image_workers, size, overlap) = match preset
        {
            Preset::Low => (2, 5, 2, 1, 200, 50),
            Preset::Medium => (4, 10, 4, 2, 300, 100),
            Preset::High => (8, 30, 8, 4, 400, 120),
        };

        Self {
            embedding_max_workers: embed_workers,
            embedding_batch_size: embed_batch,
            doc_processing_max_workers: doc_workers,
            image_max_workers: image_workers,
            chunk_size: size,
            chunk_overlap: overlap,
            ..self
        }
    }

    /// Check per-field bounds and `chunk_overlap < chunk_size`
    pub fn validate_all(&self) -> Result<(), ConfigError> {
        self.validate()?;
        check_chunking(self.chunk_size, self.chunk_overlap)
    }
}

/// Fail fast on a chunk window that could never advance
pub fn check_chunking(chunk_size: usize, chunk_overlap: usize) -> Result<(), ConfigError> {
    if chunk_size == 0 {
        return Err(ConfigError::Invalid {
            message: "chunk_size must be at least 1".to_string(),
        });
    }
    if chunk_overlap >= chunk_size {
        return Err(ConfigError::OverlapTooLarge {
            size: chunk_size,
            overlap: chunk_overlap,
        });
    }
    Ok(())
}

/// Pick the preset matching a host's core count
pub fn preset_for_cores(core_count: usize) -> Preset {
    if core_count >= 8 {
        Preset::High
    } else if core_count >= 4 {
        Preset::Medium
    } else {
        Preset::Low
    }
}

/// Derive pipeline defaults for a host with `core_count` cores.
///
/// Called once at startup; pipeline components never probe the host.
pub fn derive_defaults(core_count: usize) -> PipelineConfig {
    let cores = core_count.max(1);
    PipelineConfig {
        // Mixed CPU/IO fan-out
        query_max_workers: (cores + 2).min(16),
        // IO-bound upserts
        index_max_workers: (cores * 2).min(32),
        ..PipelineConfig::preset(preset_for_cores(cores))
    }
}

/// How query variants are produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionMode {
    /// Ask the generation service for rephrasings
    #[default]
    Llm,
    /// Offline keyword heuristics
    Keyword,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of query variants including the verbatim query
    #[validate(range(min = 1, max = 10))]
    pub query_variants: usize,

    pub expansion: ExpansionMode,

    /// Fused results to keep
    #[validate(range(min = 1))]
    pub top_k: usize,

    /// Minimum fused similarity score
    #[validate(range(min = 0.0, max = 1.0))]
    pub score_threshold: f32,

    /// Context budget in characters
    #[validate(range(min = 1))]
    pub max_context_chars: usize,

    /// Maximum citations per answer
    #[validate(range(min = 1))]
    pub max_sources: usize,

    /// Prior turns included in the generation prompt
    pub history_window: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            query_variants: 3,
            expansion: ExpansionMode::Llm,
            top_k: 7,
            score_threshold: 0.3,
            max_context_chars: 6000,
            max_sources: 5,
            history_window: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[validate(range(min = 1))]
    pub timeout_secs: u64,

    /// Attempts per call, including the first
    #[validate(range(min = 1))]
    pub max_attempts: u32,

    /// First retry delay in milliseconds
    pub base_delay_ms: u64,

    /// Retry delay cap in milliseconds
    pub max_delay_ms: u64,

    /// Random extra delay as a fraction of the exponential delay (0.0 - 1.0)
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter_ratio: f64,

    /// Global outbound request throttle (None disables)
    pub requests_per_second: Option<u32>,

    /// Idle pooled connections are closed after this many seconds
    pub pool_idle_timeout_secs: u64,

    pub pool_max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter_ratio: 0.2,
            requests_per_second: None,
            pool_idle_timeout_secs: 90,
            pool_max_idle_per_host: 16,
        }
    }
}

impl HttpConfig {
    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// API key sent with every service request
    pub api_key: Option<String>,

    /// Header carrying the API key
    pub api_key_header: String,

    pub embedding_url: String,
    pub embedding_model: String,

    /// Expected embedding dimension (None accepts whatever the model returns)
    pub embedding_dimension: Option<usize>,

    pub vision_url: String,
    pub vision_model: String,
    pub vision_prompt: String,

    pub generation_url: String,
    pub generation_model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_header: "API-KEY".to_string(),
            embedding_url: "http://localhost:11434/api/embed".to_string(),
            embedding_model: "qwen3-embedding:8b".to_string(),
            embedding_dimension: None,
            vision_url: "http://localhost:11434/api/generate".to_string(),
            vision_model: "moondream:latest".to_string(),
            vision_prompt: "Describe the image in detail".to_string(),
            generation_url: "http://localhost:11434/api/generate".to_string(),
            generation_model: "gpt-oss:20b".to_string(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1000,
        }
    }
}

/// Vector index backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexProvider {
    /// Process-local index, lost on exit
    #[default]
    Memory,
    /// Qdrant REST API
    Qdrant,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexConfig {
    pub provider: IndexProvider,
    pub url: String,
    pub collection: String,
    pub api_key: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: IndexProvider::Memory,
            url: "http://localhost:6333".to_string(),
            collection: "ragforge".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    pub log_level: String,

    /// Enable JSON logging
    pub json_logging: bool,

    /// Prometheus listener port (0 to disable)
    pub metrics_port: u16,

    /// Service name attached to logs
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: true,
            metrics_port: 0,
            service_name: "ragforge".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g., APP__PIPELINE__CHUNK_SIZE=400
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise from the default layering
    pub fn load_from(path: Option<&str>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::load(),
        }
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate_all()?;
        Validate::validate(&self.retrieval)?;
        Validate::validate(&self.http)?;
        if self.http.max_delay_ms < self.http.base_delay_ms {
            return Err(ConfigError::Invalid {
                message: format!(
                    "http.max_delay_ms ({}) is below http.base_delay_ms ({})",
                    self.http.max_delay_ms, self.http.base_delay_ms
                ),
            });
        }
        Ok(())
    }

    /// Return a copy with a preset applied to the pipeline section
    pub fn with_preset(self, preset: Preset) -> Self {
        Self {
            pipeline: self.pipeline.with_preset(preset),
            ..self
        }
    }

    /// Return a copy whose worker counts and chunking come from
    /// `derive_defaults(core_count)`; strategy and normalization are kept
    pub fn with_derived_defaults(self, core_count: usize) -> Self {
        let pipeline = PipelineConfig {
            chunking_strategy: self.pipeline.chunking_strategy,
            normalize_embeddings: self.pipeline.normalize_embeddings,
            ..derive_defaults(core_count)
        };
        Self { pipeline, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.pipeline.embedding_batch_size, 20);
        assert_eq!(config.pipeline.chunk_size, 300);
        assert_eq!(config.http.max_attempts, 3);
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_presets_are_consistent() {
        for preset in [Preset::Low, Preset::Medium, Preset::High] {
            let config = PipelineConfig::preset(preset);
            assert!(config.chunk_overlap < config.chunk_size, "{preset}");
            assert!(config.validate_all().is_ok(), "{preset}");
        }
    }

    #[test]
    fn test_preset_values() {
        let low = PipelineConfig::preset(Preset::Low);
        assert_eq!(low.embedding_max_workers, 2);
        assert_eq!(low.embedding_batch_size, 5);
        assert_eq!(low.image_max_workers, 1);
        assert_eq!((low.chunk_size, low.chunk_overlap), (200, 50));

        let high = PipelineConfig::preset(Preset::High);
        assert_eq!(high.embedding_batch_size, 30);
        assert_eq!((high.chunk_size, high.chunk_overlap), (400, 120));
    }

    #[test]
    fn test_with_preset_returns_new_value() {
        let base = PipelineConfig {
            normalize_embeddings: false,
            ..PipelineConfig::default()
        };
        let applied = base.clone().with_preset(Preset::Medium);
        assert_eq!(base.embedding_batch_size, 20);
        assert_eq!(applied.embedding_batch_size, 10);
        // Fields outside the preset survive
        assert!(!applied.normalize_embeddings);
    }

    #[test]
    fn test_preset_parsing() {
        assert_eq!("HIGH".parse::<Preset>().unwrap(), Preset::High);
        assert!(matches!(
            "turbo".parse::<Preset>(),
            Err(ConfigError::UnknownPreset { .. })
        ));
    }

    #[test]
    fn test_derive_defaults() {
        assert_eq!(derive_defaults(2).embedding_max_workers, 2);
        assert_eq!(derive_defaults(4).embedding_batch_size, 10);
        let big = derive_defaults(12);
        assert_eq!(big.chunk_size, 400);
        assert_eq!(big.query_max_workers, 14);
        assert_eq!(big.index_max_workers, 24);
        assert_eq!(derive_defaults(64).query_max_workers, 16);
        assert_eq!(derive_defaults(0).embedding_max_workers, 2);
    }

    #[test]
    fn test_with_derived_defaults_keeps_strategy() {
        let mut config = AppConfig::default();
        config.pipeline.chunking_strategy = ChunkingStrategy::Semantic;
        let derived = config.with_derived_defaults(4);
        assert_eq!(derived.pipeline.chunking_strategy, ChunkingStrategy::Semantic);
        assert_eq!(derived.pipeline.embedding_batch_size, 10);
        assert_eq!(derived.pipeline.query_max_workers, 6);
        assert!(derived.validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let config = PipelineConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..PipelineConfig::default()
        };
        assert_eq!(
            config.validate_all(),
            Err(ConfigError::OverlapTooLarge {
                size: 100,
                overlap: 100
            })
        );
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = PipelineConfig {
            embedding_max_workers: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate_all(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_delay_cap_below_base_rejected() {
        let mut config = AppConfig::default();
        config.http.max_delay_ms = 10;
        tokio_test::assert_err!(config.validate());
    }
}
