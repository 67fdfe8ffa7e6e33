//! Chat session error types

use ragforge_common::errors::{AppError, GenerationError};
use ragforge_ingestion::IngestionError;
use ragforge_search::RetrievalError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("Question is empty")]
    EmptyQuestion,

    #[error("Session was cancelled")]
    Cancelled,

    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    /// Terminal for the turn; no partial answer is kept
    #[error("Answer generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Ingestion failed: {0}")]
    Ingestion(#[from] IngestionError),
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Generation(e) => AppError::Generation(e),
            ChatError::Retrieval(e) => e.into(),
            ChatError::Cancelled => RetrievalError::Cancelled.into(),
            ChatError::Ingestion(e) => e.into(),
            other => AppError::Internal {
                message: other.to_string(),
            },
        }
    }
}
