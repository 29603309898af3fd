//! Error types for the download module.
//!
//! Chunk-level errors are pushed onto the orchestrator's failure channel and
//! aggregate into a single download-level failure; the retry policy lives in
//! the queue manager.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur while probing or fetching a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Network-level error (DNS resolution, connection refused, TLS, timeout,
    /// read error mid-body).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP error response (status outside `[200, 300)`).
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The HEAD probe response carried no `Content-Length`.
    #[error("missing Content-Length probing {url}")]
    MissingContentLength {
        /// The probed URL.
        url: String,
    },

    /// The server answered a ranged request with a plain 200, ignoring the
    /// requested range. Writing the full body at the chunk offset would
    /// corrupt the file, so the fetch is aborted.
    #[error("server ignored range request for {url}")]
    RangeIgnored {
        /// The URL that ignored the range.
        url: String,
    },

    /// The response `Content-Length` disagrees with the requested span.
    #[error("length mismatch fetching {url}: expected {expected}, server sent {actual}")]
    LengthMismatch {
        /// The fetched URL.
        url: String,
        /// Bytes the fetcher asked for.
        expected: i64,
        /// Bytes the server announced.
        actual: i64,
    },

    /// The body ended before the requested range was delivered.
    #[error("truncated body fetching {url}: received {received} of {expected} bytes")]
    TruncatedBody {
        /// The fetched URL.
        url: String,
        /// Bytes the fetcher asked for.
        expected: i64,
        /// Bytes actually received.
        received: i64,
    },

    /// File system error while writing downloaded bytes.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Persisting planned chunks failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DownloadError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_context() {
        let err = DownloadError::http_status("https://example.com/f", 503);
        assert_eq!(err.to_string(), "HTTP 503 fetching https://example.com/f");

        let err = DownloadError::TruncatedBody {
            url: "https://example.com/f".into(),
            expected: 100,
            received: 42,
        };
        assert!(err.to_string().contains("42 of 100"));

        let err = DownloadError::io(
            "/tmp/out",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/out"));
    }
}
