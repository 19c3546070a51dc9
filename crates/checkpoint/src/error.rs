//! Error types for checkpoint storage operations.

use thiserror::Error;

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors a [`CheckpointStore`](crate::CheckpointStore) implementation can surface.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint is stored under the given id.
    #[error("checkpoint not found: {0}")]
    NotFound(String),

    /// The stored bytes could not be interpreted by the caller.
    #[error("checkpoint deserialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend itself failed (disk, network, permissions, ...).
    #[error("checkpoint storage error: {0}")]
    Storage(String),

    /// I/O failure from a filesystem-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
