//! Embedding service abstraction
//!
//! `Embedder` is the network seam: one call to `embed_batch` is one request
//! to the embedding service. `EmbeddingPipeline` layers worker-pool
//! concurrency, per-item fallback, and normalization on top.

mod image;
mod pipeline;

pub use image::{HttpImageDescriber, ImageDescriber, ImageRef, ImageSource};
pub use pipeline::{EmbedInput, EmbeddingPipeline};

use crate::config::ServicesConfig;
use crate::errors::{EmbedError, NetworkError};
use crate::http::{Endpoint, RateLimitedClient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed all texts in a single request; one vector per text, in order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a single text
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| {
                EmbedError::Network(NetworkError::Decode {
                    message: "embedding response was empty".to_string(),
                })
            })
    }

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Client for an Ollama-style `/api/embed` endpoint
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: RateLimitedClient,
    endpoint: Endpoint,
    model: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbedder {
    pub fn new(client: RateLimitedClient, services: &ServicesConfig) -> Self {
        let endpoint = Endpoint::post("embedding", &services.embedding_url)
            .with_api_key(&services.api_key_header, services.api_key.as_deref());

        Self {
            client,
            endpoint,
            model: services.embedding_model.clone(),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let response: EmbedResponse = self.client.send_json(&self.endpoint, &request).await?;

        if response.embeddings.len() != texts.len() {
            return Err(EmbedError::Network(NetworkError::Decode {
                message: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    response.embeddings.len()
                ),
            }));
        }

        Ok(response.embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Deterministic offline embedder: hashed bag of words.
///
/// Texts sharing words get similar vectors, which is enough for tests and
/// local demos without an embedding service.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            vector[index] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }
}

/// Scale `vector` to unit length in place. Zero vectors are left unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity; 0.0 when either vector is zero or lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::{client, ScriptedTransport};
    use crate::http::RawResponse;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed_one("Rust ownership rules").await.unwrap();
        let b = embedder.embed_one("rust OWNERSHIP rules").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_mock_batch() {
        let embedder = MockEmbedder::new(32);
        let texts = vec!["text1".to_string(), "text2".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 32);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_http_embedder_request_shape() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(
            r#"{"embeddings":[[0.1,0.2],[0.3,0.4]]}"#,
        ))]));
        let services = ServicesConfig {
            api_key: Some("secret".into()),
            ..ServicesConfig::default()
        };
        let embedder = HttpEmbedder::new(client(transport.clone()), &services);

        let vectors = embedder
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
        let payload = &transport.payloads()[0];
        assert_eq!(payload["model"], "qwen3-embedding:8b");
        assert_eq!(payload["input"][1], "b");
    }

    #[tokio::test]
    async fn test_http_embedder_count_mismatch() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(
            r#"{"embeddings":[[0.1]]}"#,
        ))]));
        let embedder = HttpEmbedder::new(client(transport), &ServicesConfig::default());

        let err = embedder
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, EmbedError::Network(NetworkError::Decode { .. })));
    }
}
