//! Error types for wolite-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("Invalid token format")]
    InvalidTokenFormat,

    #[error("Unknown power action: {0}")]
    UnknownAction(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CoreError>;
