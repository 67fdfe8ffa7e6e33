//! Retrieval error types

use ragforge_common::errors::{AppError, BatchFailure, EmbedError, IndexError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("Query embedding failed: {0}")]
    Embed(#[from] EmbedError),

    #[error("Vector search failed: {0}")]
    Index(#[from] IndexError),

    #[error("No query variants to search")]
    NoVariants,

    /// Every variant failed; the last failure is kept for diagnosis
    #[error("All {variants} query variants failed; last error: {last_error}")]
    AllVariantsFailed { variants: usize, last_error: String },

    #[error("Search cancelled")]
    Cancelled,

    #[error(transparent)]
    Batch(#[from] BatchFailure),
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Embed(e) => AppError::Embed(e),
            RetrievalError::Index(e) => AppError::Index(e),
            // Query embedding is the first step that cancellation skips
            RetrievalError::Cancelled => AppError::Embed(EmbedError::Batch(BatchFailure::Cancelled)),
            other => AppError::Internal {
                message: other.to_string(),
            },
        }
    }
}
