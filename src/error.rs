//! Error types for the conversation digest pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, DigestError>;

#[derive(Error, Debug)]
pub enum DigestError {

    // =============================
    // Pipeline Errors
    // =============================

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Summarization failed: {0}")]
    SummarizationFailed(String),

    #[error("Summarization rejected: {0}")]
    SummarizationRejected(String),

    #[error("Cannot parse date '{value}': {reason}")]
    DateParseError { value: String, reason: String },

    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DigestError {
    /// Whether retrying the same call may succeed (network, timeout, upstream errors)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DigestError::StoreUnavailable(_) | DigestError::SummarizationFailed(_)
        )
    }
}
