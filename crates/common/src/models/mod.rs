//! Pipeline data model

mod context;
mod document;
mod ingestion_job;
mod query;

pub use context::{Citation, ContextBundle, ConversationTurn, CONTEXT_SEPARATOR};
pub use document::{Chunk, Document, DocumentFormat, EmbeddingRecord};
pub use ingestion_job::{FailureStage, IngestionJob, ItemFailure, JobStatus};
pub use query::{Query, QueryVariant, RetrievedChunk};
