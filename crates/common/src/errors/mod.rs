//! Error types for RagForge pipelines
//!
//! Provides one error enum per failure domain:
//! - Network failures from the rate-limited HTTP client
//! - Per-item embedding and image-description failures
//! - Configuration, vector index, and generation failures
//! - Scheduler-originated item failures (cancellation, panics)
//!
//! `AppError` aggregates them with machine-readable codes for callers that
//! need a single error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Configuration (1xxx)
    InvalidConfiguration,
    UnknownPreset,

    // Network (2xxx)
    UpstreamTransient,
    UpstreamRejected,
    RetriesExhausted,
    InvalidResponse,

    // Pipeline items (3xxx)
    EmbeddingFailed,
    DescriptionFailed,
    Cancelled,

    // Storage (4xxx)
    IndexError,

    // Generation (5xxx)
    GenerationFailed,

    // Internal (9xxx)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidConfiguration => 1001,
            ErrorCode::UnknownPreset => 1002,

            ErrorCode::UpstreamTransient => 2001,
            ErrorCode::UpstreamRejected => 2002,
            ErrorCode::RetriesExhausted => 2003,
            ErrorCode::InvalidResponse => 2004,

            ErrorCode::EmbeddingFailed => 3001,
            ErrorCode::DescriptionFailed => 3002,
            ErrorCode::Cancelled => 3003,

            ErrorCode::IndexError => 4001,

            ErrorCode::GenerationFailed => 5001,

            ErrorCode::InternalError => 9001,
        }
    }
}

/// Failures of an outbound HTTP call after the client's retry policy ran.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    /// Timeout, 5xx, 429, or connection reset. Retried inside the client and
    /// only visible to callers of the transport seam.
    #[error("Transient upstream failure: {message}")]
    Transient { message: String },

    /// Non-retriable 4xx response.
    #[error("Upstream rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Invalid upstream response: {message}")]
    Decode { message: String },
}

impl NetworkError {
    /// HTTP status of a rejected request, if any
    pub fn rejected_status(&self) -> Option<u16> {
        match self {
            NetworkError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Item failures produced by the batch scheduler itself rather than by the
/// operation it runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchFailure {
    #[error("Cancelled before dispatch")]
    Cancelled,

    #[error("Worker panicked: {message}")]
    Panicked { message: String },

    #[error("Batch returned {got} results for {expected} items")]
    LengthMismatch { expected: usize, got: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbedError {
    #[error("Embedding request failed: {0}")]
    Network(#[from] NetworkError),

    #[error("Embedding has dimension {got}, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Empty embedding input")]
    EmptyInput,

    #[error(transparent)]
    Batch(#[from] BatchFailure),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescribeError {
    #[error("Failed to read image {name}: {message}")]
    Read { name: String, message: String },

    #[error("Image description request failed: {0}")]
    Network(#[from] NetworkError),

    #[error("Image description for {name} was empty")]
    EmptyDescription { name: String },

    #[error("No image describer configured")]
    Unavailable,

    #[error(transparent)]
    Batch(#[from] BatchFailure),
}

/// Invalid parameter combinations, raised before any work is scheduled.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Unknown preset: {name}. Available: low, medium, high")]
    UnknownPreset { name: String },

    #[error("Failed to load configuration: {message}")]
    Load { message: String },
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(err: validator::ValidationErrors) -> Self {
        ConfigError::Invalid {
            message: err.to_string(),
        }
    }
}

impl From<::config::ConfigError> for ConfigError {
    fn from(err: ::config::ConfigError) -> Self {
        ConfigError::Load {
            message: err.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("Vector index request failed: {0}")]
    Network(#[from] NetworkError),

    #[error("Vector has dimension {got}, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Malformed index payload for point {id}: {message}")]
    Payload { id: String, message: String },

    #[error(transparent)]
    Batch(#[from] BatchFailure),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    Network(#[from] NetworkError),

    #[error("Generation service returned an empty response")]
    EmptyResponse,
}

/// Application error aggregating every pipeline failure domain
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Describe(#[from] DescribeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Network(e) => network_code(e),
            AppError::Embed(EmbedError::Network(e)) => network_code(e),
            AppError::Embed(EmbedError::Batch(BatchFailure::Cancelled)) => ErrorCode::Cancelled,
            AppError::Embed(_) => ErrorCode::EmbeddingFailed,
            AppError::Describe(DescribeError::Network(e)) => network_code(e),
            AppError::Describe(DescribeError::Batch(BatchFailure::Cancelled)) => {
                ErrorCode::Cancelled
            }
            AppError::Describe(_) => ErrorCode::DescriptionFailed,
            AppError::Config(ConfigError::UnknownPreset { .. }) => ErrorCode::UnknownPreset,
            AppError::Config(_) => ErrorCode::InvalidConfiguration,
            AppError::Index(IndexError::Batch(BatchFailure::Cancelled)) => ErrorCode::Cancelled,
            AppError::Index(_) => ErrorCode::IndexError,
            AppError::Generation(_) => ErrorCode::GenerationFailed,
            AppError::Serialization(_) => ErrorCode::InternalError,
            AppError::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Whether repeating the whole operation later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::UpstreamTransient | ErrorCode::RetriesExhausted | ErrorCode::Cancelled
        )
    }
}

fn network_code(err: &NetworkError) -> ErrorCode {
    match err {
        NetworkError::Transient { .. } => ErrorCode::UpstreamTransient,
        NetworkError::Rejected { .. } => ErrorCode::UpstreamRejected,
        NetworkError::Exhausted { .. } => ErrorCode::RetriesExhausted,
        NetworkError::Decode { .. } => ErrorCode::InvalidResponse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::from(ConfigError::OverlapTooLarge {
            size: 100,
            overlap: 100,
        });
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
        assert_eq!(err.code().as_code(), 1001);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_nested_network_error_code() {
        let err = AppError::from(EmbedError::Network(NetworkError::Exhausted {
            attempts: 3,
            last_error: "timeout".into(),
        }));
        assert_eq!(err.code(), ErrorCode::RetriesExhausted);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_rejected_status() {
        let err = NetworkError::Rejected {
            status: 400,
            body: "bad input".into(),
        };
        assert_eq!(err.rejected_status(), Some(400));
        assert_eq!(AppError::from(err).code(), ErrorCode::UpstreamRejected);
    }

    #[test]
    fn test_cancelled_item() {
        let err = AppError::from(IndexError::from(BatchFailure::Cancelled));
        assert_eq!(err.code(), ErrorCode::Cancelled);
    }
}
