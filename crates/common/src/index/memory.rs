//! Process-local vector index with exact cosine search

use super::{ChunkPayload, IndexHit, IndexPoint, VectorIndex};
use crate::embeddings::cosine_similarity;
use crate::errors::IndexError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Points {
    dimension: Option<usize>,
    entries: HashMap<Uuid, (Vec<f32>, ChunkPayload)>,
}

/// Brute-force index held in memory; contents are lost on drop
#[derive(Default)]
pub struct InMemoryVectorIndex {
    points: RwLock<Points>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get(&self, id: &Uuid) -> Option<ChunkPayload> {
        self.points
            .read()
            .await
            .entries
            .get(id)
            .map(|(_, payload)| payload.clone())
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, point: IndexPoint) -> Result<(), IndexError> {
        let mut points = self.points.write().await;
        match points.dimension {
            Some(expected) if expected != point.vector.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: point.vector.len(),
                });
            }
            Some(_) => {}
            None => points.dimension = Some(point.vector.len()),
        }
        points.entries.insert(point.id, (point.vector, point.payload));
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<IndexHit>, IndexError> {
        let points = self.points.read().await;
        if let Some(expected) = points.dimension {
            if expected != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
        }

        let mut hits: Vec<IndexHit> = points
            .entries
            .iter()
            .filter_map(|(id, (stored, payload))| {
                let score = cosine_similarity(vector, stored);
                (score >= score_threshold).then(|| IndexHit {
                    id: *id,
                    score,
                    payload: payload.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(top_k);
        Ok(hits)
    }
}
