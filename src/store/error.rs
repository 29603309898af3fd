//! Error types for store operations.

use thiserror::Error;

/// Errors that can occur while reading or mutating persistent state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No queue exists with the given id.
    #[error("queue {0} not found")]
    QueueNotFound(i64),

    /// No download exists with the given id.
    #[error("download {0} not found")]
    DownloadNotFound(i64),
}
