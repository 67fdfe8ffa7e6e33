//! Vector index clients
//!
//! The index is the only durable store of embeddings. Both clients are safe
//! for concurrent upserts and queries from many workers.

mod memory;
mod qdrant;

pub use memory::InMemoryVectorIndex;
pub use qdrant::QdrantIndex;

use crate::config::{IndexConfig, IndexProvider};
use crate::errors::IndexError;
use crate::http::RateLimitedClient;
use crate::models::{Chunk, RetrievedChunk};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Metadata stored with every vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: Uuid,
    pub source_name: String,
    pub text: String,
    pub position: usize,
    /// Ingestion order of the source document
    pub document_seq: u64,
    #[serde(default)]
    pub derived_from_image: bool,
    pub content_hash: String,
    pub model: String,
}

impl ChunkPayload {
    pub fn from_chunk(
        chunk: &Chunk,
        source_name: impl Into<String>,
        document_seq: u64,
        model: impl Into<String>,
    ) -> Self {
        Self {
            document_id: chunk.document_id,
            source_name: source_name.into(),
            text: chunk.text.clone(),
            position: chunk.position,
            document_seq,
            derived_from_image: chunk.derived_from_image,
            content_hash: chunk.content_hash(),
            model: model.into(),
        }
    }
}

/// Vector plus metadata, keyed by chunk id
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: Uuid,
    pub score: f32,
    pub payload: ChunkPayload,
}

impl IndexHit {
    /// Convert to a retrieval result attributed to the variant with `rank`
    pub fn into_retrieved(self, variant_rank: usize) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: self.id,
            document_id: self.payload.document_id,
            source_name: self.payload.source_name,
            text: self.payload.text,
            position: self.payload.position,
            document_seq: self.payload.document_seq,
            derived_from_image: self.payload.derived_from_image,
            score: self.score,
            variant_ranks: vec![variant_rank],
        }
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the point with `point.id`
    async fn upsert(&self, point: IndexPoint) -> Result<(), IndexError>;

    /// Up to `top_k` hits scoring at least `score_threshold`, best first
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<IndexHit>, IndexError>;

    /// Prepare storage for vectors of `dimension`
    async fn ensure_ready(&self, _dimension: usize) -> Result<(), IndexError> {
        Ok(())
    }
}

/// Build the configured index client
pub fn create_index(config: &IndexConfig, client: RateLimitedClient) -> Arc<dyn VectorIndex> {
    match config.provider {
        IndexProvider::Memory => Arc::new(InMemoryVectorIndex::new()),
        IndexProvider::Qdrant => Arc::new(QdrantIndex::new(client, config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_into_retrieved() {
        let document_id = Uuid::new_v4();
        let chunk = Chunk {
            id: Chunk::chunk_id(document_id, 2),
            document_id,
            position: 2,
            text: "alpha beta".into(),
            start: 10,
            end: 20,
            derived_from_image: true,
        };
        let hit = IndexHit {
            id: chunk.id,
            score: 0.75,
            payload: ChunkPayload::from_chunk(&chunk, "notes.md", 4, "mock"),
        };

        let retrieved = hit.into_retrieved(1);

        assert_eq!(retrieved.chunk_id, chunk.id);
        assert_eq!(retrieved.document_seq, 4);
        assert_eq!(retrieved.variant_ranks, vec![1]);
        assert!(retrieved.derived_from_image);
        assert_eq!(retrieved.text, "alpha beta");
    }
}
