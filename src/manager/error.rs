//! Error types for queue manager operations.

use thiserror::Error;

use crate::download::DownloadError;
use crate::store::{DownloadState, StoreError};

/// Errors surfaced by queue manager operations.
///
/// Validation errors are returned to the caller and never retried. Transient
/// download failures never surface here; they travel through the failure
/// channel and the retry policy instead.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The URL could not be parsed or has no usable scheme/host.
    #[error("invalid download URL: {url}")]
    InvalidUrl {
        /// The offending URL string.
        url: String,
    },

    /// No file name was given and the URL path yields none.
    #[error("cannot derive a file name from {url}")]
    EmptyFileName {
        /// The offending URL string.
        url: String,
    },

    /// A queue's download directory must be absolute.
    #[error("queue directory must be an absolute path: {directory}")]
    RelativeDirectory {
        /// The offending directory string.
        directory: String,
    },

    /// `max_concurrent` must allow at least one download.
    #[error("max_concurrent must be at least 1, got {value}")]
    InvalidMaxConcurrent {
        /// The offending value.
        value: i64,
    },

    /// `retry_limit` may not be negative.
    #[error("retry_limit may not be negative, got {value}")]
    InvalidRetryLimit {
        /// The offending value.
        value: i64,
    },

    /// Schedule mode was enabled without both window times.
    #[error("schedule mode requires both start and end times")]
    MissingScheduleWindow,

    /// The download is already running; at most one orchestrator may exist
    /// per download.
    #[error("download {id} is already in progress")]
    AlreadyInProgress {
        /// Download identifier.
        id: i64,
    },

    /// The operation requires an IN_PROGRESS download.
    #[error("download {id} is {state}, not IN_PROGRESS")]
    NotInProgress {
        /// Download identifier.
        id: i64,
        /// The state the download was actually in.
        state: DownloadState,
    },

    /// An IN_PROGRESS download had no orchestrator in memory; internal
    /// invariant violation.
    #[error("no active orchestrator for download {id}")]
    OrchestratorMissing {
        /// Download identifier.
        id: i64,
    },

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Download engine failure during orchestrator startup.
    #[error(transparent)]
    Download(#[from] DownloadError),
}
