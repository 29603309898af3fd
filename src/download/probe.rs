//! HTTP HEAD probing and client construction.
//!
//! The probe runs once per download, before chunks are planned: it confirms
//! the resource's `Content-Length` (required; without it the byte range
//! `[0, size)` cannot be partitioned) and whether the server advertises
//! `Accept-Ranges: bytes`.

use std::time::Duration;

use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH};
use reqwest::Client;
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;

/// Result of the HEAD probe: the two facts chunk planning needs.
#[derive(Debug, Clone, Copy)]
pub struct ProbeResult {
    /// Total size of the resource in bytes.
    pub content_length: i64,
    /// True when the server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
}

/// Builds the HTTP client used by the probe and all chunk fetchers.
///
/// Certificate verification is disabled to match the transport behavior this
/// engine replaces; hardening it is a recorded open decision. Connect and
/// read timeouts keep a dead link from hanging a fetcher forever.
///
/// # Panics
///
/// Panics if the client builder fails with this static configuration, which
/// does not happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn build_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .read_timeout(Duration::from_secs(READ_TIMEOUT_SECS))
        .danger_accept_invalid_certs(true)
        .build()
        .expect("failed to build HTTP client with static configuration")
}

/// Performs a HEAD request and returns the parsed metadata.
///
/// # Errors
///
/// Returns [`DownloadError::Network`] on connection failure,
/// [`DownloadError::HttpStatus`] for a status outside `[200, 300)`, and
/// [`DownloadError::MissingContentLength`] when the response carries no
/// usable `Content-Length` (absent, unparseable, or zero; an empty resource
/// has nothing to partition).
#[instrument(skip(client))]
pub async fn probe(client: &Client, url: &str) -> Result<ProbeResult, DownloadError> {
    let response = client
        .head(url)
        .send()
        .await
        .map_err(|e| DownloadError::network(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::http_status(url, status.as_u16()));
    }

    let content_length = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|len| *len > 0)
        .ok_or_else(|| DownloadError::MissingContentLength {
            url: url.to_string(),
        })?;

    let accept_ranges = response
        .headers()
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));

    debug!(content_length, accept_ranges, "probe complete");
    Ok(ProbeResult {
        content_length,
        accept_ranges,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn probe_reads_length_and_range_support() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/file.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 4096])
                    .insert_header("Accept-Ranges", "bytes"),
            )
            .mount(&server)
            .await;

        let client = build_client();
        let result = probe(&client, &format!("{}/file.bin", server.uri()))
            .await
            .unwrap();
        assert_eq!(result.content_length, 4096);
        assert!(result.accept_ranges);
    }

    #[tokio::test]
    async fn probe_without_accept_ranges_is_single_part() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1024]))
            .mount(&server)
            .await;

        let client = build_client();
        let result = probe(&client, &server.uri()).await.unwrap();
        assert!(!result.accept_ranges);
    }

    #[tokio::test]
    async fn probe_requires_content_length() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("Accept-Ranges", "bytes"))
            .mount(&server)
            .await;

        let client = build_client();
        let err = probe(&client, &server.uri()).await.unwrap_err();
        assert!(matches!(err, DownloadError::MissingContentLength { .. }));
    }

    #[tokio::test]
    async fn probe_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = build_client();
        let err = probe(&client, &server.uri()).await.unwrap_err();
        assert!(matches!(err, DownloadError::HttpStatus { status: 503, .. }));
    }
}
