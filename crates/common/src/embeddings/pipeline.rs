//! Concurrent embedding of chunk texts and description of images

use super::{l2_normalize, Embedder, ImageDescriber, ImageRef};
use crate::config::PipelineConfig;
use crate::errors::{DescribeError, EmbedError, NetworkError};
use crate::models::EmbeddingRecord;
use crate::scheduler::{BatchScheduler, CancellationToken};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Text to embed, keyed by the chunk it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedInput {
    pub id: Uuid,
    pub text: String,
}

impl EmbedInput {
    pub fn new(id: Uuid, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

/// Post-processing applied to every vector, at ingestion and query time alike
#[derive(Debug, Clone)]
struct VectorPolicy {
    model: String,
    normalize: bool,
    expected_dimension: Option<usize>,
}

impl VectorPolicy {
    fn finish(&self, mut vector: Vec<f32>) -> Result<Vec<f32>, EmbedError> {
        if let Some(expected) = self.expected_dimension {
            if vector.len() != expected {
                return Err(EmbedError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
        }
        if self.normalize {
            l2_normalize(&mut vector);
        }
        Ok(vector)
    }

    fn record(&self, chunk_id: Uuid, vector: Vec<f32>) -> Result<EmbeddingRecord, EmbedError> {
        Ok(EmbeddingRecord {
            chunk_id,
            vector: self.finish(vector)?,
            model: self.model.clone(),
        })
    }
}

/// Embedding and image-description stage
#[derive(Clone)]
pub struct EmbeddingPipeline {
    embedder: Arc<dyn Embedder>,
    describer: Option<Arc<dyn ImageDescriber>>,
    text_scheduler: BatchScheduler,
    image_scheduler: BatchScheduler,
    policy: VectorPolicy,
}

impl EmbeddingPipeline {
    pub fn new(embedder: Arc<dyn Embedder>, config: &PipelineConfig) -> Self {
        let policy = VectorPolicy {
            model: embedder.model_name().to_string(),
            normalize: config.normalize_embeddings,
            expected_dimension: None,
        };

        Self {
            embedder,
            describer: None,
            text_scheduler: BatchScheduler::new(
                "embedding",
                config.embedding_batch_size,
                config.embedding_max_workers,
            ),
            image_scheduler: BatchScheduler::new("image", 1, config.image_max_workers),
            policy,
        }
    }

    pub fn with_describer(mut self, describer: Arc<dyn ImageDescriber>) -> Self {
        self.describer = Some(describer);
        self
    }

    /// Reject vectors whose length differs from `dimension`
    pub fn with_expected_dimension(mut self, dimension: Option<usize>) -> Self {
        self.policy.expected_dimension = dimension;
        self
    }

    pub fn model_name(&self) -> &str {
        &self.policy.model
    }

    pub fn normalizes(&self) -> bool {
        self.policy.normalize
    }

    /// Embed every input; output aligns index-for-index with `inputs`.
    ///
    /// Batches of `embedding_batch_size` go out as single requests with at
    /// most `embedding_max_workers` in flight.
    #[instrument(skip_all, fields(items = inputs.len()))]
    pub async fn embed_texts_batch(
        &self,
        inputs: Vec<EmbedInput>,
        cancel: &CancellationToken,
    ) -> Vec<Result<EmbeddingRecord, EmbedError>> {
        let embedder = self.embedder.clone();
        let policy = self.policy.clone();

        let results = self
            .text_scheduler
            .run_batched(inputs, cancel, move |batch| {
                let embedder = embedder.clone();
                let policy = policy.clone();
                async move { embed_group(embedder.as_ref(), &policy, batch).await }
            })
            .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(failed, total = results.len(), "Some embeddings failed");
        }
        results
    }

    /// Embed a query with the same post-processing as ingested chunks
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }
        let vector = self.embedder.embed_one(text).await?;
        self.policy.finish(vector)
    }

    /// Describe every image; output aligns index-for-index with `images`
    #[instrument(skip_all, fields(images = images.len()))]
    pub async fn embed_images_batch(
        &self,
        images: Vec<ImageRef>,
        cancel: &CancellationToken,
    ) -> Vec<Result<String, DescribeError>> {
        let Some(describer) = self.describer.clone() else {
            return images.iter().map(|_| Err(DescribeError::Unavailable)).collect();
        };

        self.image_scheduler
            .run_each(images, cancel, move |image| {
                let describer = describer.clone();
                async move {
                    let result = describer.describe(&image).await;
                    if let Err(err) = &result {
                        warn!(image = %image.name, error = %err, "Image description failed");
                    }
                    result
                }
            })
            .await
    }
}

/// One batch: a single request, falling back to per-item requests when the
/// service rejects the batch as a whole.
async fn embed_group(
    embedder: &dyn Embedder,
    policy: &VectorPolicy,
    batch: Vec<EmbedInput>,
) -> Vec<Result<EmbeddingRecord, EmbedError>> {
    let mut results: Vec<Option<Result<EmbeddingRecord, EmbedError>>> =
        batch.iter().map(|_| None).collect();

    let mut pending = Vec::with_capacity(batch.len());
    for (slot, input) in batch.iter().enumerate() {
        if input.text.trim().is_empty() {
            results[slot] = Some(Err(EmbedError::EmptyInput));
        } else {
            pending.push(slot);
        }
    }

    let texts: Vec<String> = pending.iter().map(|&i| batch[i].text.clone()).collect();

    match embedder.embed_batch(&texts).await {
        Ok(vectors) if vectors.len() == texts.len() => {
            for (&slot, vector) in pending.iter().zip(vectors) {
                results[slot] = Some(policy.record(batch[slot].id, vector));
            }
        }
        Ok(vectors) => {
            let err = EmbedError::Network(NetworkError::Decode {
                message: format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            });
            for &slot in &pending {
                results[slot] = Some(Err(err.clone()));
            }
        }
        Err(err) if pending.len() > 1 && is_rejection(&err) => {
            debug!(items = pending.len(), error = %err, "Batch rejected, embedding items individually");
            for &slot in &pending {
                let input = &batch[slot];
                let result = embedder
                    .embed_one(&input.text)
                    .await
                    .and_then(|vector| policy.record(input.id, vector));
                results[slot] = Some(result);
            }
        }
        Err(err) => {
            for &slot in &pending {
                results[slot] = Some(Err(err.clone()));
            }
        }
    }

    results
        .into_iter()
        .map(|r| r.unwrap_or(Err(EmbedError::EmptyInput)))
        .collect()
}

fn is_rejection(err: &EmbedError) -> bool {
    matches!(err, EmbedError::Network(NetworkError::Rejected { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbedder;
    use async_trait::async_trait;
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Embeds text `n` as `[n]` after a random delay; rejects batches containing "poison"
    struct SlowEmbedder {
        batch_calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for SlowEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            let delay = rand::thread_rng().gen_range(0..10);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            if texts.iter().any(|t| t == "poison") {
                return Err(EmbedError::Network(NetworkError::Rejected {
                    status: 400,
                    body: "bad input".into(),
                }));
            }
            Ok(texts
                .iter()
                .map(|t| vec![t.parse::<f32>().unwrap_or(0.0), 1.0])
                .collect())
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    fn config(batch: usize, workers: usize) -> PipelineConfig {
        PipelineConfig {
            embedding_batch_size: batch,
            embedding_max_workers: workers,
            normalize_embeddings: false,
            ..PipelineConfig::default()
        }
    }

    fn slow() -> Arc<SlowEmbedder> {
        Arc::new(SlowEmbedder {
            batch_calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_output_order_matches_input() {
        for _ in 0..5 {
            let embedder = slow();
            let pipeline = EmbeddingPipeline::new(embedder.clone(), &config(3, 4));
            let inputs: Vec<EmbedInput> = (0..25)
                .map(|i| EmbedInput::new(Uuid::new_v4(), i.to_string()))
                .collect();
            let ids: Vec<Uuid> = inputs.iter().map(|i| i.id).collect();

            let results = pipeline
                .embed_texts_batch(inputs, &CancellationToken::new())
                .await;

            for (i, (result, id)) in results.iter().zip(&ids).enumerate() {
                let record = result.as_ref().unwrap();
                assert_eq!(record.chunk_id, *id);
                assert_eq!(record.vector[0], i as f32);
            }
            assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), 9);
        }
    }

    #[tokio::test]
    async fn test_rejected_batch_isolates_poisoned_item() {
        let pipeline = EmbeddingPipeline::new(slow(), &config(4, 2));
        let inputs = vec![
            EmbedInput::new(Uuid::new_v4(), "1"),
            EmbedInput::new(Uuid::new_v4(), "poison"),
            EmbedInput::new(Uuid::new_v4(), "3"),
            EmbedInput::new(Uuid::new_v4(), "4"),
        ];

        let results = pipeline
            .embed_texts_batch(inputs, &CancellationToken::new())
            .await;

        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(EmbedError::Network(NetworkError::Rejected { status: 400, .. }))
        ));
        assert!(results[2].is_ok());
        assert_eq!(results[3].as_ref().unwrap().vector[0], 4.0);
    }

    #[tokio::test]
    async fn test_blank_text_fails_alone() {
        let pipeline = EmbeddingPipeline::new(slow(), &config(3, 1));
        let inputs = vec![
            EmbedInput::new(Uuid::new_v4(), "1"),
            EmbedInput::new(Uuid::new_v4(), "   "),
        ];

        let results = pipeline
            .embed_texts_batch(inputs, &CancellationToken::new())
            .await;

        tokio_test::assert_ok!(&results[0]);
        assert_eq!(results[1], Err(EmbedError::EmptyInput));
    }

    #[tokio::test]
    async fn test_normalization_uniform_for_query_and_chunks() {
        let embedder = Arc::new(MockEmbedder::new(16));
        let pipeline = EmbeddingPipeline::new(embedder, &PipelineConfig::default());
        assert!(pipeline.normalizes());

        let text = "vector search with cosine similarity";
        let chunk = pipeline
            .embed_texts_batch(vec![EmbedInput::new(Uuid::new_v4(), text)], &CancellationToken::new())
            .await
            .remove(0)
            .unwrap();
        let query = pipeline.embed_query(text).await.unwrap();

        assert_eq!(chunk.vector, query);
        let norm: f32 = query.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let pipeline = EmbeddingPipeline::new(Arc::new(MockEmbedder::new(8)), &config(2, 1))
            .with_expected_dimension(Some(16));

        let err = pipeline.embed_query("hello").await.unwrap_err();

        assert_eq!(err, EmbedError::DimensionMismatch { expected: 16, got: 8 });
    }

    #[tokio::test]
    async fn test_images_without_describer_fail() {
        let pipeline = EmbeddingPipeline::new(Arc::new(MockEmbedder::new(8)), &config(2, 1));

        let results = pipeline
            .embed_images_batch(
                vec![ImageRef::from_bytes("a.png", vec![1])],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(results, vec![Err(DescribeError::Unavailable)]);
    }

    struct NameDescriber;

    #[async_trait]
    impl ImageDescriber for NameDescriber {
        async fn describe(&self, image: &ImageRef) -> Result<String, DescribeError> {
            if image.name.starts_with("bad") {
                return Err(DescribeError::EmptyDescription {
                    name: image.name.clone(),
                });
            }
            let delay = rand::thread_rng().gen_range(0..10);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(format!("picture of {}", image.name))
        }
    }

    #[tokio::test]
    async fn test_image_descriptions_in_order() {
        let pipeline = EmbeddingPipeline::new(Arc::new(MockEmbedder::new(8)), &config(2, 1))
            .with_describer(Arc::new(NameDescriber));
        let images = vec![
            ImageRef::from_bytes("cat", vec![]),
            ImageRef::from_bytes("bad-dog", vec![]),
            ImageRef::from_bytes("bird", vec![]),
        ];

        let results = pipeline
            .embed_images_batch(images, &CancellationToken::new())
            .await;

        assert_eq!(results[0], Ok("picture of cat".to_string()));
        assert!(results[1].is_err());
        assert_eq!(results[2], Ok("picture of bird".to_string()));
    }
}
