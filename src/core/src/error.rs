use std::path::PathBuf;

use thiserror::Error;

/// A3S Model error types
#[derive(Error, Debug)]
pub enum ModelError {
    /// Malformed recipe
    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    /// Archive/digest failure or missing build input
    #[error("Build error: {0}")]
    BuildError(String),

    /// A pending blob whose staged file no longer exists
    #[error("Missing temp reference: {}", .0.display())]
    MissingTempRef(PathBuf),

    /// Filesystem failure while committing a blob
    #[error("Commit failed for {digest}: {message}")]
    CommitError { digest: String, message: String },

    /// Remote registry failure
    #[error("Transport error: {registry} - {message}")]
    TransportError { registry: String, message: String },

    /// Content hashed to a different digest than expected
    #[error("Integrity error: expected {digest}, got {actual}")]
    IntegrityError { digest: String, actual: String },

    /// Invalid model path or digest
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Manifest or blob missing from the local store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::SerializationError(err.to_string())
    }
}

/// Result type alias for A3S Model operations
pub type Result<T> = std::result::Result<T, ModelError>;
