//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors raised while storing or restoring run snapshots
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint with the requested id or run
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Binary serialization error: {0}")]
    BinarySerialization(#[from] bincode::Error),

    /// Backend-specific storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record is structurally valid but cannot be used (wrong run, bad payload)
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
