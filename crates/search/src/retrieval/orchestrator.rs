//! Concurrent multi-variant vector search
//!
//! One search per variant, fanned out through a `BatchScheduler` bounded by
//! `min(query_max_workers, variants)`. Completion order does not matter;
//! fusion fixes the output order.

use super::fusion::fuse;
use crate::errors::RetrievalError;
use ragforge_common::config::PipelineConfig;
use ragforge_common::metrics::record_search;
use ragforge_common::models::{QueryVariant, RetrievedChunk};
use ragforge_common::{BatchScheduler, CancellationToken, EmbeddingPipeline, VectorIndex};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct RetrievalOrchestrator {
    embeddings: EmbeddingPipeline,
    index: Arc<dyn VectorIndex>,
    max_workers: usize,
}

impl RetrievalOrchestrator {
    pub fn new(
        embeddings: EmbeddingPipeline,
        index: Arc<dyn VectorIndex>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            embeddings,
            index,
            max_workers: config.query_max_workers.max(1),
        }
    }

    /// Search every variant and fuse the hits into at most `top_k` chunks.
    ///
    /// Failed variants are logged and skipped; the call fails only when
    /// every variant fails. Variants not yet dispatched when `cancel` fires
    /// are never searched, and a search with no variant run is `Cancelled`.
    #[instrument(skip_all, fields(variants = variants.len(), top_k, threshold))]
    pub async fn search_fused(
        &self,
        variants: &[QueryVariant],
        top_k: usize,
        threshold: f32,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        if variants.is_empty() {
            return Err(RetrievalError::NoVariants);
        }
        let start = Instant::now();

        let scheduler = BatchScheduler::new(
            "search",
            1,
            self.max_workers.min(variants.len()),
        );
        let embeddings = self.embeddings.clone();
        let index = self.index.clone();

        let outcomes = scheduler
            .run_each(variants.to_vec(), cancel, move |variant| {
                let embeddings = embeddings.clone();
                let index = index.clone();
                async move {
                    let vector = embeddings.embed_query(&variant.text).await?;
                    let hits = index.query(&vector, top_k, threshold).await?;
                    Ok::<_, RetrievalError>(
                        hits.into_iter()
                            .map(|hit| hit.into_retrieved(variant.rank))
                            .collect::<Vec<_>>(),
                    )
                }
            })
            .await;

        let mut retrieved = Vec::new();
        let mut failed = 0;
        let mut last_error = None;
        for (variant, outcome) in variants.iter().zip(outcomes) {
            match outcome {
                Ok(hits) => retrieved.extend(hits),
                Err(err) => {
                    warn!(rank = variant.rank, variant = %variant.text, error = %err, "Variant search failed");
                    failed += 1;
                    last_error = Some(err);
                }
            }
        }

        if failed == variants.len() {
            if cancel.is_cancelled() {
                info!("Search cancelled before any variant completed");
                return Err(RetrievalError::Cancelled);
            }
            return Err(RetrievalError::AllVariantsFailed {
                variants: variants.len(),
                last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
            });
        }

        let fused = fuse(retrieved, top_k, threshold);
        record_search(start.elapsed().as_secs_f64(), variants.len(), fused.len());
        info!(
            results = fused.len(),
            failed_variants = failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fused search complete"
        );
        Ok(fused)
    }
}
