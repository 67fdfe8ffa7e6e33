//! Chat session: ingestion plus question answering over one conversation
//!
//! History is append-only. A turn is recorded only after the answer has
//! been generated, so a failed generation leaves no trace in the history.

use crate::assembler::ContextAssembler;
use crate::errors::ChatError;
use crate::generator::ResponseGenerator;
use chrono::Utc;
use ragforge_common::config::{AppConfig, RetrievalConfig};
use ragforge_common::models::{ContextBundle, ConversationTurn, Document, IngestionJob, Query, QueryVariant};
use ragforge_common::{CancellationToken, ImageRef, Services};
use ragforge_ingestion::IngestionPipeline;
use ragforge_search::{QueryEnhancer, RetrievalOrchestrator};
use serde::Serialize;
use tracing::{info, instrument};

/// Result of one successful `ask`
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub turn: ConversationTurn,
    pub variants: Vec<QueryVariant>,
    pub context: ContextBundle,
}

pub struct ChatSession {
    ingestion: IngestionPipeline,
    enhancer: QueryEnhancer,
    orchestrator: RetrievalOrchestrator,
    assembler: ContextAssembler,
    responder: ResponseGenerator,
    retrieval: RetrievalConfig,
    history: Vec<ConversationTurn>,
    cancel: CancellationToken,
}

impl ChatSession {
    pub fn new(
        ingestion: IngestionPipeline,
        enhancer: QueryEnhancer,
        orchestrator: RetrievalOrchestrator,
        responder: ResponseGenerator,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            ingestion,
            enhancer,
            orchestrator,
            assembler: ContextAssembler::from_config(&retrieval),
            responder,
            retrieval,
            history: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Wire a session over shared service clients
    pub fn from_services(services: &Services, config: &AppConfig) -> Result<Self, ChatError> {
        let embeddings = services.embedding_pipeline(config);
        let ingestion =
            IngestionPipeline::new(embeddings.clone(), services.index.clone(), &config.pipeline)
                .map_err(ragforge_ingestion::IngestionError::from)?;
        let orchestrator =
            RetrievalOrchestrator::new(embeddings, services.index.clone(), &config.pipeline);

        Ok(Self::new(
            ingestion,
            QueryEnhancer::from_config(&config.retrieval, services.generator.clone()),
            orchestrator,
            ResponseGenerator::new(services.generator.clone(), config.retrieval.history_window),
            config.retrieval.clone(),
        ))
    }

    pub async fn ingest_documents(&self, documents: Vec<Document>) -> Result<IngestionJob, ChatError> {
        Ok(self.ingestion.ingest_batch(documents, &self.cancel).await?)
    }

    pub async fn ingest_images(&self, images: Vec<ImageRef>) -> Result<IngestionJob, ChatError> {
        Ok(self.ingestion.ingest_images(images, &self.cancel).await?)
    }

    /// Expand, search, assemble, and generate; the turn is appended on success
    #[instrument(skip_all, fields(turn = self.history.len()))]
    pub async fn ask(&mut self, question: &str) -> Result<ChatAnswer, ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }
        if self.cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        let query = match self.history.last() {
            Some(previous) => Query::follow_up(question, self.history.len() - 1, previous.query.clone()),
            None => Query::new(question),
        };

        let variants = self
            .enhancer
            .expand(&query, self.retrieval.query_variants)
            .await;
        let ranked = self
            .orchestrator
            .search_fused(
                &variants,
                self.retrieval.top_k,
                self.retrieval.score_threshold,
                &self.cancel,
            )
            .await?;
        let context = self.assembler.assemble(&ranked);

        let answer = self
            .responder
            .generate(&query.text, &context, &self.history)
            .await?;

        let turn = ConversationTurn {
            query: query.text,
            answer,
            citations: context.citations.clone(),
            context_chunks: context.chunks.len(),
            timestamp: Utc::now(),
        };
        self.history.push(turn.clone());
        info!(
            variants = variants.len(),
            retrieved = ranked.len(),
            included = context.chunks.len(),
            citations = turn.citations.len(),
            "Turn answered"
        );

        Ok(ChatAnswer {
            turn,
            variants,
            context,
        })
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Stop scheduling new ingestion batches and variant searches.
    ///
    /// In-flight calls finish naturally; later questions fail with
    /// `ChatError::Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token observed by this session's ingestion runs and searches
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
