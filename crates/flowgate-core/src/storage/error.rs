//! Error types for the storage collaborator.

use thiserror::Error;

/// Errors that can occur while reading or writing flow records.
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite failure.
    #[error("Database error: {0}")]
    Connection(#[from] rusqlite::Error),

    /// Record not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored or requested value is not acceptable.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// An execution status change that would leave a terminal state.
    #[error("Invalid status transition for execution {execution_id}: {from} -> {to}")]
    InvalidTransition {
        /// Execution being updated.
        execution_id: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// The shared connection mutex was poisoned.
    #[error("Database lock error: {0}")]
    Lock(String),
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
