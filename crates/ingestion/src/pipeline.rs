//! Ingestion pipeline
//!
//! Documents are chunked in parallel, every chunk across the whole call is
//! embedded as one flattened batch stream, and successful embeddings are
//! upserted with their metadata. Failures are recorded per item in the
//! returned job; nothing already upserted is rolled back.

use crate::chunker::{chunk_document, ChunkingConfig};
use crate::errors::IngestionError;
use ragforge_common::config::PipelineConfig;
use ragforge_common::embeddings::{EmbedInput, EmbeddingPipeline, ImageRef};
use ragforge_common::errors::ConfigError;
use ragforge_common::index::{ChunkPayload, IndexPoint, VectorIndex};
use ragforge_common::metrics::{record_ingestion, record_ingestion_failures};
use ragforge_common::models::{
    Chunk, Document, DocumentFormat, FailureStage, IngestionJob, ItemFailure, JobStatus,
};
use ragforge_common::scheduler::{BatchScheduler, CancellationToken};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use chrono::Utc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Per-document bookkeeping carried through the stages
struct DocumentMeta {
    id: Uuid,
    source_name: String,
    seq: u64,
}

impl DocumentMeta {
    fn failure(&self, stage: FailureStage, chunk_id: Option<Uuid>, message: String) -> ItemFailure {
        ItemFailure {
            stage,
            document_id: Some(self.id),
            chunk_id,
            source_name: self.source_name.clone(),
            message,
        }
    }
}

/// Chunk, embed, and index documents
pub struct IngestionPipeline {
    embeddings: EmbeddingPipeline,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkingConfig,
    documents: BatchScheduler,
    upserts: BatchScheduler,
    next_seq: AtomicU64,
}

impl IngestionPipeline {
    /// Fails with `ConfigError` if the chunking parameters are inconsistent
    pub fn new(
        embeddings: EmbeddingPipeline,
        index: Arc<dyn VectorIndex>,
        config: &PipelineConfig,
    ) -> Result<Self, ConfigError> {
        let chunking = ChunkingConfig::from_pipeline(config);
        chunking.validate()?;

        Ok(Self {
            embeddings,
            index,
            chunking,
            documents: BatchScheduler::new("documents", 1, config.doc_processing_max_workers),
            upserts: BatchScheduler::new("index", 1, config.index_max_workers),
            next_seq: AtomicU64::new(sequence_origin()),
        })
    }

    pub fn chunking(&self) -> &ChunkingConfig {
        &self.chunking
    }

    pub fn embeddings(&self) -> &EmbeddingPipeline {
        &self.embeddings
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Chunk one document with this pipeline's chunking parameters
    pub fn chunk(&self, document: &Document) -> Result<Vec<Chunk>, ConfigError> {
        chunk_document(document, &self.chunking)
    }

    /// Ingest parsed documents as one job
    #[instrument(skip_all, fields(documents = documents.len()))]
    pub async fn ingest_batch(
        &self,
        documents: Vec<Document>,
        cancel: &CancellationToken,
    ) -> Result<IngestionJob, IngestionError> {
        self.chunking.validate()?;
        let job = IngestionJob::new(documents.len());
        self.run(documents, job, cancel).await
    }

    /// Describe images, then ingest each description as an image-derived document
    #[instrument(skip_all, fields(images = images.len()))]
    pub async fn ingest_images(
        &self,
        images: Vec<ImageRef>,
        cancel: &CancellationToken,
    ) -> Result<IngestionJob, IngestionError> {
        self.chunking.validate()?;
        let mut job = IngestionJob::new(images.len());

        let sources: Vec<(String, String)> = images
            .iter()
            .map(|i| (i.name.clone(), i.source_key()))
            .collect();
        let descriptions = self.embeddings.embed_images_batch(images, cancel).await;

        let mut documents = Vec::with_capacity(sources.len());
        for ((name, key), result) in sources.into_iter().zip(descriptions) {
            match result {
                Ok(description) => documents.push(Document::from_source(
                    &key,
                    name,
                    DocumentFormat::Image,
                    description,
                )),
                Err(err) => job.record_failure(ItemFailure {
                    stage: FailureStage::Describe,
                    document_id: None,
                    chunk_id: None,
                    source_name: name,
                    message: err.to_string(),
                }),
            }
        }

        self.run(documents, job, cancel).await
    }

    async fn run(
        &self,
        documents: Vec<Document>,
        mut job: IngestionJob,
        cancel: &CancellationToken,
    ) -> Result<IngestionJob, IngestionError> {
        let started = Instant::now();
        info!(job_id = %job.id, documents = documents.len(), "Starting ingestion job");

        // Ingestion order drives retrieval tie-breaks
        let base_seq = self
            .next_seq
            .fetch_add(documents.len() as u64, Ordering::SeqCst);
        let metas: Vec<DocumentMeta> = documents
            .iter()
            .enumerate()
            .map(|(i, d)| DocumentMeta {
                id: d.id,
                source_name: d.source_name.clone(),
                seq: base_seq + i as u64,
            })
            .collect();

        job.status = JobStatus::Chunking;
        let chunks = self.chunk_all(documents, &metas, &mut job, cancel).await;
        job.chunks_total = chunks.len();

        job.status = JobStatus::Embedding;
        let points = self.embed_all(&chunks, &metas, &mut job, cancel).await;

        job.status = JobStatus::Indexing;
        self.index_all(points, &mut job, cancel).await;

        job.finish(cancel.is_cancelled());

        for stage in [
            FailureStage::Chunking,
            FailureStage::Describe,
            FailureStage::Embedding,
            FailureStage::Indexing,
        ] {
            record_ingestion_failures(stage_label(stage), job.failures_at(stage).count());
        }
        record_ingestion(started.elapsed().as_secs_f64(), job.chunks_total);

        info!(
            job_id = %job.id,
            status = ?job.status,
            chunks = job.chunks_total,
            indexed = job.indexed.len(),
            failures = job.failures.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Ingestion job finished"
        );

        Ok(job)
    }

    /// Chunk documents in parallel; CPU work runs on the blocking pool
    async fn chunk_all(
        &self,
        documents: Vec<Document>,
        metas: &[DocumentMeta],
        job: &mut IngestionJob,
        cancel: &CancellationToken,
    ) -> Vec<(Chunk, usize)> {
        let chunking = self.chunking.clone();
        let results = self
            .documents
            .run_each(documents, cancel, move |document| {
                let chunking = chunking.clone();
                async move {
                    let source_name = document.source_name.clone();
                    tokio::task::spawn_blocking(move || chunk_document(&document, &chunking))
                        .await
                        .map_err(|e| IngestionError::Chunking {
                            source_name,
                            message: e.to_string(),
                        })?
                        .map_err(IngestionError::from)
                }
            })
            .await;

        let mut chunks = Vec::new();
        for (doc_index, (meta, result)) in metas.iter().zip(results).enumerate() {
            match result {
                Ok(doc_chunks) => chunks.extend(doc_chunks.into_iter().map(|c| (c, doc_index))),
                Err(err) => {
                    warn!(document = %meta.source_name, error = %err, "Chunking failed");
                    job.record_failure(meta.failure(FailureStage::Chunking, None, err.to_string()));
                }
            }
        }
        chunks
    }

    async fn embed_all(
        &self,
        chunks: &[(Chunk, usize)],
        metas: &[DocumentMeta],
        job: &mut IngestionJob,
        cancel: &CancellationToken,
    ) -> Vec<IndexPoint> {
        let inputs = chunks
            .iter()
            .map(|(c, _)| EmbedInput::new(c.id, c.text.clone()))
            .collect();
        let records = self.embeddings.embed_texts_batch(inputs, cancel).await;

        let mut points = Vec::with_capacity(chunks.len());
        for ((chunk, doc_index), result) in chunks.iter().zip(records) {
            let meta = &metas[*doc_index];
            match result {
                Ok(record) => points.push(IndexPoint {
                    id: chunk.id,
                    payload: ChunkPayload::from_chunk(chunk, &meta.source_name, meta.seq, &record.model),
                    vector: record.vector,
                }),
                Err(err) => job.record_failure(meta.failure(
                    FailureStage::Embedding,
                    Some(chunk.id),
                    err.to_string(),
                )),
            }
        }
        points
    }

    async fn index_all(&self, points: Vec<IndexPoint>, job: &mut IngestionJob, cancel: &CancellationToken) {
        let keys: Vec<(Uuid, Uuid, String)> = points
            .iter()
            .map(|p| (p.id, p.payload.document_id, p.payload.source_name.clone()))
            .collect();

        let index = self.index.clone();
        let results = self
            .upserts
            .run_each(points, cancel, move |point| {
                let index = index.clone();
                async move { index.upsert(point).await }
            })
            .await;

        for ((chunk_id, document_id, source_name), result) in keys.into_iter().zip(results) {
            match result {
                Ok(()) => job.indexed.push(chunk_id),
                Err(err) => {
                    warn!(chunk_id = %chunk_id, error = %err, "Upsert failed");
                    job.record_failure(ItemFailure {
                        stage: FailureStage::Indexing,
                        document_id: Some(document_id),
                        chunk_id: Some(chunk_id),
                        source_name,
                        message: err.to_string(),
                    });
                }
            }
        }
    }
}

/// Ingestion sequences start at the current time in microseconds, so
/// documents from a later process order after earlier ones in a persistent
/// index.
fn sequence_origin() -> u64 {
    Utc::now().timestamp_micros().max(0) as u64
}

fn stage_label(stage: FailureStage) -> &'static str {
    match stage {
        FailureStage::Chunking => "chunking",
        FailureStage::Describe => "describe",
        FailureStage::Embedding => "embedding",
        FailureStage::Indexing => "indexing",
    }
}
