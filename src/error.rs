//! Error types for the Pilosa HTTP boundary
//!
//! Structured errors are defined with thiserror; anyhow is accepted at the
//! edges (binary, collaborator glue) and folded into [`PilosaError::Other`].

use thiserror::Error;

/// Main error type for Pilosa service operations
#[derive(Error, Debug)]
pub enum PilosaError {
    /// The archive worker has stopped and no longer accepts events
    #[error("Archive worker is not running")]
    ArchiveClosed,

    /// No query executor is attached to this process
    #[error("Query executor unavailable")]
    ExecutorUnavailable,

    /// Process id is not known to the registry
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    /// Request parameters were missing or malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid process id format
    #[error("Invalid process id: {0}")]
    InvalidProcessId(#[from] uuid::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Pilosa operations
pub type Result<T> = std::result::Result<T, PilosaError>;

/// Convert anyhow::Error to PilosaError
impl From<anyhow::Error> for PilosaError {
    fn from(err: anyhow::Error) -> Self {
        PilosaError::Other(err.to_string())
    }
}
