//! Qdrant REST client

use super::{ChunkPayload, IndexHit, IndexPoint, VectorIndex};
use crate::config::IndexConfig;
use crate::errors::{IndexError, NetworkError};
use crate::http::{Endpoint, Method, RateLimitedClient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

/// Collection-scoped client over a shared `RateLimitedClient`
#[derive(Debug, Clone)]
pub struct QdrantIndex {
    client: RateLimitedClient,
    collection: String,
    upsert: Endpoint,
    search: Endpoint,
    create: Endpoint,
}

#[derive(Serialize)]
struct PointBody<'a> {
    id: String,
    vector: &'a [f32],
    payload: &'a ChunkPayload,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

impl QdrantIndex {
    pub fn new(client: RateLimitedClient, config: &IndexConfig) -> Self {
        let base = config.url.trim_end_matches('/');
        let collection_url = format!("{}/collections/{}", base, config.collection);
        let key = config.api_key.as_deref();

        Self {
            client,
            collection: config.collection.clone(),
            upsert: Endpoint::put("index_upsert", format!("{collection_url}/points?wait=true"))
                .with_api_key("api-key", key),
            search: Endpoint::post("index_search", format!("{collection_url}/points/search"))
                .with_api_key("api-key", key),
            create: Endpoint::new("index_create", Method::PUT, collection_url)
                .with_api_key("api-key", key),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn parse_hit(point: ScoredPoint) -> Result<IndexHit, IndexError> {
        let raw_id = match &point.id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let id = Uuid::parse_str(&raw_id).map_err(|e| IndexError::Payload {
            id: raw_id.clone(),
            message: e.to_string(),
        })?;
        let payload = point.payload.ok_or_else(|| IndexError::Payload {
            id: raw_id.clone(),
            message: "missing payload".to_string(),
        })?;
        let payload: ChunkPayload =
            serde_json::from_value(payload).map_err(|e| IndexError::Payload {
                id: raw_id,
                message: e.to_string(),
            })?;

        Ok(IndexHit {
            id,
            score: point.score,
            payload,
        })
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, point: IndexPoint) -> Result<(), IndexError> {
        let body = PointBody {
            id: point.id.to_string(),
            vector: &point.vector,
            payload: &point.payload,
        };
        let body = json!({ "points": [body] });
        self.client.send(&self.upsert, &body).await?;
        debug!(id = %point.id, "Upserted point");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<IndexHit>, IndexError> {
        let body = json!({
            "vector": vector,
            "limit": top_k,
            "score_threshold": score_threshold,
            "with_payload": true,
        });
        let response: SearchResponse = self.client.send_json(&self.search, &body).await?;
        response.result.into_iter().map(Self::parse_hit).collect()
    }

    /// Create the collection with cosine distance; an existing one is kept
    async fn ensure_ready(&self, dimension: usize) -> Result<(), IndexError> {
        let body = json!({ "vectors": { "size": dimension, "distance": "Cosine" } });
        match self.client.send(&self.create, &body).await {
            Ok(_) => {
                info!(collection = %self.collection, dimension, "Created collection");
                Ok(())
            }
            Err(NetworkError::Rejected { status: 409, .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::{client, ScriptedTransport};
    use crate::http::RawResponse;
    use std::sync::Arc;

    fn payload_json(document_id: Uuid) -> Value {
        json!({
            "document_id": document_id,
            "source_name": "guide.md",
            "text": "chunk text",
            "position": 3,
            "document_seq": 1,
            "derived_from_image": false,
            "content_hash": "abc",
            "model": "qwen3-embedding:8b"
        })
    }

    #[tokio::test]
    async fn test_search_parses_hits() {
        let id = Uuid::new_v4();
        let document_id = Uuid::new_v4();
        let body = json!({
            "result": [{ "id": id.to_string(), "score": 0.82, "payload": payload_json(document_id) }]
        });
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(body.to_string()))]));
        let index = QdrantIndex::new(client(transport.clone()), &IndexConfig::default());

        let hits = index.query(&[0.1, 0.2], 5, 0.3).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);
        assert_eq!(hits[0].payload.document_id, document_id);
        assert_eq!(hits[0].payload.position, 3);

        let request = &transport.payloads()[0];
        assert_eq!(request["limit"], 5);
        assert_eq!(request["with_payload"], true);
    }

    #[tokio::test]
    async fn test_bad_point_id_is_payload_error() {
        let body = json!({
            "result": [{ "id": 17, "score": 0.5, "payload": payload_json(Uuid::new_v4()) }]
        });
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(body.to_string()))]));
        let index = QdrantIndex::new(client(transport), &IndexConfig::default());

        let err = index.query(&[0.1], 5, 0.0).await.unwrap_err();

        assert!(matches!(err, IndexError::Payload { ref id, .. } if id == "17"));
    }

    #[tokio::test]
    async fn test_existing_collection_is_ready() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::status(
            409,
            "already exists",
        ))]));
        let index = QdrantIndex::new(client(transport), &IndexConfig::default());

        assert!(index.ensure_ready(768).await.is_ok());
    }

    #[tokio::test]
    async fn test_upsert_failure_surfaces() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::status(
            400,
            "wrong vector size",
        ))]));
        let index = QdrantIndex::new(client(transport), &IndexConfig::default());
        let point = IndexPoint {
            id: Uuid::new_v4(),
            vector: vec![0.1],
            payload: serde_json::from_value(payload_json(Uuid::new_v4())).unwrap(),
        };

        let err = index.upsert(point).await.unwrap_err();

        assert!(matches!(
            err,
            IndexError::Network(NetworkError::Rejected { status: 400, .. })
        ));
    }
}
