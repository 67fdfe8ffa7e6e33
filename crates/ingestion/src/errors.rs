//! Ingestion error types

use ragforge_common::errors::{AppError, BatchFailure, ConfigError, IndexError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestionError {
    /// Invalid chunking parameters; raised before any work is scheduled
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Chunking failed for {source_name}: {message}")]
    Chunking { source_name: String, message: String },

    #[error("Failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("Index unavailable: {0}")]
    Index(#[from] IndexError),

    #[error(transparent)]
    Batch(#[from] BatchFailure),
}

impl From<IngestionError> for AppError {
    fn from(err: IngestionError) -> Self {
        match err {
            IngestionError::Config(e) => AppError::Config(e),
            IngestionError::Index(e) => AppError::Index(e),
            other => AppError::Internal {
                message: other.to_string(),
            },
        }
    }
}
