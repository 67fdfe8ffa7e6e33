//! Wiring of the remote collaborators from configuration
//!
//! Every client shares one `RateLimitedClient`, so all outbound calls reuse
//! a single connection pool and one optional request throttle.

use crate::config::AppConfig;
use crate::embeddings::{
    Embedder, EmbeddingPipeline, HttpEmbedder, HttpImageDescriber, ImageDescriber,
};
use crate::errors::{AppError, EmbedError};
use crate::generation::{Generator, HttpGenerator};
use crate::http::RateLimitedClient;
use crate::index::{create_index, VectorIndex};
use std::sync::Arc;
use tracing::info;

/// Remote services used by the pipelines
#[derive(Clone)]
pub struct Services {
    pub client: RateLimitedClient,
    pub embedder: Arc<dyn Embedder>,
    pub describer: Arc<dyn ImageDescriber>,
    pub generator: Arc<dyn Generator>,
    pub index: Arc<dyn VectorIndex>,
}

impl Services {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let client = RateLimitedClient::new(&config.http)?;

        info!(
            embedding = %config.services.embedding_url,
            generation = %config.services.generation_url,
            index = ?config.index.provider,
            "Service clients configured"
        );

        Ok(Self {
            embedder: Arc::new(HttpEmbedder::new(client.clone(), &config.services)),
            describer: Arc::new(HttpImageDescriber::new(client.clone(), &config.services)),
            generator: Arc::new(HttpGenerator::new(client.clone(), &config.services)),
            index: create_index(&config.index, client.clone()),
            client,
        })
    }

    /// Embedding pipeline over these services
    pub fn embedding_pipeline(&self, config: &AppConfig) -> EmbeddingPipeline {
        EmbeddingPipeline::new(self.embedder.clone(), &config.pipeline)
            .with_describer(self.describer.clone())
            .with_expected_dimension(config.services.embedding_dimension)
    }

    /// Make sure the index can hold vectors from `pipeline`.
    ///
    /// Uses the configured dimension, or probes the embedding service once.
    pub async fn prepare_index(
        &self,
        pipeline: &EmbeddingPipeline,
        config: &AppConfig,
    ) -> Result<usize, AppError> {
        let dimension = match config.services.embedding_dimension {
            Some(dimension) => dimension,
            None => {
                let probe = pipeline.embed_query("dimension probe").await?;
                if probe.is_empty() {
                    return Err(AppError::Embed(EmbedError::EmptyInput));
                }
                probe.len()
            }
        };

        self.index.ensure_ready(dimension).await?;
        info!(dimension, "Vector index ready");
        Ok(dimension)
    }
}
