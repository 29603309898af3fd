//! Per-chunk HTTP range fetcher.
//!
//! One fetcher streams one contiguous byte range of one URL through the
//! queue's bandwidth limiter into the download's positional writer. The
//! fetcher observes two cooperative signals between slices: the download's
//! pause broadcast and its cancellation token. It never touches persistent
//! state; its only externally visible effects are bytes on disk and the
//! monotonic advancement of its shared position.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::DownloadChunk;

use super::constants::SLICE_SIZE;
use super::error::DownloadError;
use super::limiter::BandwidthLimiter;
use super::writer::PositionalWriter;

/// Shared position of one chunk, read by the orchestrator's progress ticker
/// while the fetcher advances it.
#[derive(Debug)]
pub struct ChunkProgress {
    /// Opaque globally-unique chunk identifier.
    pub id: String,
    /// Owning download.
    pub download_id: i64,
    /// First byte of the range (inclusive).
    pub range_start: i64,
    /// One past the last byte of the range (exclusive).
    pub range_end: i64,
    /// True when the chunk spans the whole resource because the server
    /// rejected ranges.
    pub single_part: bool,
    pointer: AtomicI64,
}

impl ChunkProgress {
    /// Builds the shared progress cell from a persisted chunk row.
    #[must_use]
    pub fn from_chunk(chunk: &DownloadChunk) -> Self {
        Self {
            id: chunk.id.clone(),
            download_id: chunk.download_id,
            range_start: chunk.range_start,
            range_end: chunk.range_end,
            single_part: chunk.single_part,
            pointer: AtomicI64::new(chunk.current_pointer),
        }
    }

    /// The next byte to fetch.
    #[must_use]
    pub fn pointer(&self) -> i64 {
        self.pointer.load(Ordering::Acquire)
    }

    /// Bytes delivered so far.
    #[must_use]
    pub fn delivered(&self) -> i64 {
        self.pointer() - self.range_start
    }

    /// Whether the chunk has delivered its full range.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pointer() >= self.range_end
    }

    /// Snapshot as a persistable chunk row.
    #[must_use]
    pub fn snapshot(&self) -> DownloadChunk {
        DownloadChunk {
            id: self.id.clone(),
            range_start: self.range_start,
            range_end: self.range_end,
            current_pointer: self.pointer(),
            download_id: self.download_id,
            single_part: self.single_part,
        }
    }

    fn advance(&self, n: i64) {
        self.pointer.fetch_add(n, Ordering::AcqRel);
    }

    fn reset(&self) {
        self.pointer.store(self.range_start, Ordering::Release);
    }
}

/// Fetches one byte range of one URL, honoring the shared limiter and the
/// cooperative pause/cancel signals.
pub struct ChunkFetcher {
    url: String,
    client: Client,
    progress: Arc<ChunkProgress>,
    limiter: Arc<BandwidthLimiter>,
    writer: Arc<PositionalWriter>,
    pause: CancellationToken,
    cancel: CancellationToken,
    failures: mpsc::Sender<DownloadError>,
}

impl ChunkFetcher {
    /// Creates a fetcher for one chunk of a download.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        url: String,
        client: Client,
        progress: Arc<ChunkProgress>,
        limiter: Arc<BandwidthLimiter>,
        writer: Arc<PositionalWriter>,
        pause: CancellationToken,
        cancel: CancellationToken,
        failures: mpsc::Sender<DownloadError>,
    ) -> Self {
        Self {
            url,
            client,
            progress,
            limiter,
            writer,
            pause,
            cancel,
            failures,
        }
    }

    /// Runs the fetch to completion, cooperative exit, or failure.
    ///
    /// Unrecoverable errors are pushed onto the failure channel; cooperative
    /// exits (pause or cancel) leave the partial state for the orchestrator's
    /// next tick to persist.
    pub async fn run(self) {
        let chunk_id = self.progress.id.clone();
        if let Err(error) = self.fetch().await {
            warn!(chunk_id = %chunk_id, %error, "chunk fetch failed");
            let _ = self.failures.send(error).await;
        }
    }

    async fn fetch(&self) -> Result<(), DownloadError> {
        if self.progress.is_complete() {
            return Ok(());
        }

        // A single-part body always restarts at byte zero: without range
        // support there is no way to ask the server for a suffix.
        if self.progress.single_part {
            self.progress.reset();
        }

        let start = self.progress.pointer();
        let end = self.progress.range_end;

        let mut request = self.client.get(&self.url);
        if !self.progress.single_part {
            request = request.header(RANGE, format!("bytes={}-{}", start, end - 1));
        }

        let response = tokio::select! {
            () = self.pause.cancelled() => return Ok(()),
            () = self.cancel.cancelled() => return Ok(()),
            result = request.send() => result.map_err(|e| DownloadError::network(&self.url, e))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(&self.url, status.as_u16()));
        }
        if !self.progress.single_part && status == reqwest::StatusCode::OK {
            return Err(DownloadError::RangeIgnored {
                url: self.url.clone(),
            });
        }

        let expected = end - start;
        if let Some(announced) = response.content_length() {
            let announced = announced as i64;
            if announced != expected {
                return Err(DownloadError::LengthMismatch {
                    url: self.url.clone(),
                    expected,
                    actual: announced,
                });
            }
        }

        debug!(
            chunk_id = %self.progress.id,
            start,
            end,
            single_part = self.progress.single_part,
            "streaming chunk"
        );

        let mut stream = response.bytes_stream();
        loop {
            let item = tokio::select! {
                () = self.pause.cancelled() => return Ok(()),
                () = self.cancel.cancelled() => return Ok(()),
                item = stream.next() => item,
            };

            let Some(item) = item else {
                break;
            };
            let bytes = item.map_err(|e| DownloadError::network(&self.url, e))?;

            let mut offset = 0;
            while offset < bytes.len() {
                let pointer = self.progress.pointer();
                let remaining = usize::try_from(end - pointer).unwrap_or(0);
                if remaining == 0 {
                    return Ok(());
                }

                let len = bytes.len().min(offset + SLICE_SIZE).min(offset + remaining);
                let slice = &bytes[offset..len];

                tokio::select! {
                    () = self.pause.cancelled() => return Ok(()),
                    result = self.limiter.wait(&self.cancel, slice.len()) => {
                        if result.is_err() {
                            return Ok(());
                        }
                    }
                }

                let written = self
                    .writer
                    .write_at(slice, pointer as u64)
                    .map_err(|e| DownloadError::io(self.writer.path(), e))?;
                self.progress.advance(written as i64);
                offset += written;
            }
        }

        let pointer = self.progress.pointer();
        if pointer < end {
            return Err(DownloadError::TruncatedBody {
                url: self.url.clone(),
                expected,
                received: pointer - start,
            });
        }
        Ok(())
    }
}
