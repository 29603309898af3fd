//! Per-download orchestration: chunk planning, parallel fetching, progress
//! aggregation, and the pause/cancel/complete state machine.
//!
//! The orchestrator owns its chunk fetchers and its writer for the duration
//! of one run. It holds no reference back to the queue manager; everything
//! the manager needs to know travels through the core event channel
//! ([`CoreEvent`]), and the manager reaches the orchestrator only through
//! [`pause`](DownloadOrchestrator::pause),
//! [`cancel`](DownloadOrchestrator::cancel), and
//! [`status`](DownloadOrchestrator::status).

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::Client;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::events::{CoreEvent, DownloadStatus, EventBus};
use crate::store::{Download, DownloadChunk, DownloadState, Store};

use super::chunk::{ChunkFetcher, ChunkProgress};
use super::constants::{CHUNK_COUNT, PROGRESS_TICK, RATE_EMA_ALPHA};
use super::error::DownloadError;
use super::limiter::BandwidthLimiter;
use super::probe;
use super::writer::PositionalWriter;

/// Partitions `[0, size)` into [`CHUNK_COUNT`] equal contiguous chunks, the
/// last one absorbing the remainder, or a single whole-resource chunk when
/// the server does not support ranges.
fn plan_chunks(download_id: i64, size: i64, ranged: bool) -> Vec<DownloadChunk> {
    if !ranged {
        return vec![DownloadChunk {
            id: Uuid::new_v4().to_string(),
            range_start: 0,
            range_end: size,
            current_pointer: 0,
            download_id,
            single_part: true,
        }];
    }

    let base = size / CHUNK_COUNT;
    (0..CHUNK_COUNT)
        .map(|i| {
            let range_start = i * base;
            let range_end = if i == CHUNK_COUNT - 1 {
                size
            } else {
                (i + 1) * base
            };
            DownloadChunk {
                id: Uuid::new_v4().to_string(),
                range_start,
                range_end,
                current_pointer: range_start,
                download_id,
                single_part: false,
            }
        })
        .collect()
}

/// Turns one download row into concrete byte traffic and aggregates the
/// result.
///
/// Constructed by the queue manager for every run (initial dispatch, resume,
/// retry, and startup recovery); at most one orchestrator exists in memory
/// per download id at any time.
pub struct DownloadOrchestrator {
    download: Download,
    store: Store,
    bus: EventBus,
    limiter: Arc<BandwidthLimiter>,
    client: Client,

    /// Chunk rows handed over at construction; consumed by `start`.
    initial_chunks: Mutex<Vec<DownloadChunk>>,

    state: Mutex<DownloadState>,
    chunks: Mutex<Vec<Arc<ChunkProgress>>>,
    size: AtomicI64,
    /// Smoothed byte rate, stored as `f64` bits.
    speed_bits: AtomicU64,
    completed: AtomicBool,

    writer: Mutex<Option<Arc<PositionalWriter>>>,
    pause_signal: CancellationToken,
    cancel_token: CancellationToken,
    tasks: AsyncMutex<JoinSet<()>>,
}

impl DownloadOrchestrator {
    /// Creates an orchestrator for one download run.
    ///
    /// `chunks` are the persisted chunk rows of a previous run; pass an empty
    /// vector for a first dispatch, in which case `start` probes the server
    /// and plans fresh chunks.
    #[must_use]
    pub fn new(
        download: Download,
        chunks: Vec<DownloadChunk>,
        limiter: Arc<BandwidthLimiter>,
        store: Store,
        bus: EventBus,
        client: Client,
    ) -> Arc<Self> {
        let state = download.state;
        Arc::new(Self {
            download,
            store,
            bus,
            limiter,
            client,
            initial_chunks: Mutex::new(chunks),
            state: Mutex::new(state),
            chunks: Mutex::new(Vec::new()),
            size: AtomicI64::new(0),
            speed_bits: AtomicU64::new(0f64.to_bits()),
            completed: AtomicBool::new(false),
            writer: Mutex::new(None),
            pause_signal: CancellationToken::new(),
            cancel_token: CancellationToken::new(),
            tasks: AsyncMutex::new(JoinSet::new()),
        })
    }

    /// The download this orchestrator runs.
    #[must_use]
    pub fn download_id(&self) -> i64 {
        self.download.id
    }

    /// The queue the download belongs to.
    #[must_use]
    pub fn queue_id(&self) -> i64 {
        self.download.queue_id
    }

    /// Begins the run: plans and persists chunks if none exist, opens the
    /// writer, and spawns one fetcher per chunk plus the progress ticker and
    /// failure listener.
    ///
    /// # Errors
    ///
    /// Returns a probe error (missing `Content-Length`, bad status, network)
    /// before any chunk or file change is persisted, a [`DownloadError::Store`]
    /// error if persisting planned chunks fails, or [`DownloadError::Io`] if
    /// the output file cannot be opened.
    #[instrument(skip(self), fields(download_id = self.download.id, url = %self.download.url))]
    #[allow(clippy::unwrap_used)]
    pub async fn start(self: Arc<Self>) -> Result<(), DownloadError> {
        *self.state.lock().unwrap() = DownloadState::InProgress;

        let mut rows = std::mem::take(&mut *self.initial_chunks.lock().unwrap());
        if rows.is_empty() {
            let probed = probe::probe(&self.client, &self.download.url).await?;
            rows = plan_chunks(
                self.download.id,
                probed.content_length,
                probed.accept_ranges,
            );
            for chunk in &rows {
                self.store.upsert_download_chunk(chunk).await?;
            }
            info!(
                download_id = self.download.id,
                size = probed.content_length,
                chunk_count = rows.len(),
                ranged = probed.accept_ranges,
                "planned chunks"
            );
        }

        let size = rows.iter().map(|c| c.range_end).max().unwrap_or(0);
        self.size.store(size, Ordering::Release);

        let save_path = std::path::Path::new(&self.download.save_path);
        if let Some(parent) = save_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }
        let writer =
            Arc::new(PositionalWriter::open(save_path).map_err(|e| DownloadError::io(save_path, e))?);
        *self.writer.lock().unwrap() = Some(Arc::clone(&writer));

        let progress: Vec<Arc<ChunkProgress>> = rows
            .iter()
            .map(|c| Arc::new(ChunkProgress::from_chunk(c)))
            .collect();
        *self.chunks.lock().unwrap() = progress.clone();

        let (failure_tx, failure_rx) = mpsc::channel(progress.len());

        let mut tasks = self.tasks.lock().await;
        for cell in progress {
            let fetcher = ChunkFetcher::new(
                self.download.url.clone(),
                self.client.clone(),
                cell,
                Arc::clone(&self.limiter),
                Arc::clone(&writer),
                self.pause_signal.clone(),
                self.cancel_token.clone(),
                failure_tx.clone(),
            );
            tasks.spawn(fetcher.run());
        }
        drop(failure_tx);

        tasks.spawn(Arc::clone(&self).run_ticker());
        tasks.spawn(Arc::clone(&self).run_failure_listener(failure_rx));

        debug!(download_id = self.download.id, "orchestrator started");
        Ok(())
    }

    /// Pauses the run: broadcasts the pause signal, cancels in-flight I/O,
    /// waits for every spawned task to exit, and closes the writer.
    ///
    /// After this returns no task spawned by the orchestrator is running and
    /// no further events will be emitted for this download. Idempotent.
    #[instrument(skip(self), fields(download_id = self.download.id))]
    #[allow(clippy::unwrap_used)]
    pub async fn pause(&self) {
        self.pause_signal.cancel();
        self.cancel_token.cancel();

        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
        drop(tasks);

        {
            let mut state = self.state.lock().unwrap();
            if *state == DownloadState::InProgress {
                *state = DownloadState::Paused;
            }
        }

        let writer = self.writer.lock().unwrap().take();
        if let Some(writer) = writer {
            if let Err(error) = writer.close() {
                warn!(download_id = self.download.id, %error, "failed to close writer");
            }
        }
    }

    /// Cancels the run and deletes the partially-written output file.
    #[instrument(skip(self), fields(download_id = self.download.id))]
    pub async fn cancel(&self) {
        self.pause().await;
        match tokio::fs::remove_file(&self.download.save_path).await {
            Ok(()) => info!(download_id = self.download.id, "removed output file"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                warn!(download_id = self.download.id, %error, "failed to remove output file");
            }
        }
    }

    /// Structural snapshot of the run for persistence and display.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn status(&self) -> DownloadStatus {
        let chunks: Vec<DownloadChunk> = self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.snapshot())
            .collect();
        let size = self.size.load(Ordering::Acquire);
        let progress: i64 = chunks.iter().map(DownloadChunk::delivered).sum();
        let progress_percentage = if size > 0 {
            (progress as f64 / size as f64) * 100.0
        } else {
            0.0
        };

        DownloadStatus {
            id: self.download.id,
            progress_percentage,
            speed: f64::from_bits(self.speed_bits.load(Ordering::Acquire)),
            state: *self.state.lock().unwrap(),
            chunks,
        }
    }

    /// Sum of bytes delivered across all chunks.
    #[allow(clippy::unwrap_used)]
    fn progress_bytes(&self) -> i64 {
        self.chunks
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.delivered())
            .sum()
    }

    /// Emits a progress snapshot once per second and detects completion.
    #[allow(clippy::unwrap_used)]
    async fn run_ticker(self: Arc<Self>) {
        let mut interval = tokio::time::interval(PROGRESS_TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_progress = self.progress_bytes();

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let progress = self.progress_bytes();
            let delta = (progress - last_progress).max(0) as f64;
            last_progress = progress;

            let previous = f64::from_bits(self.speed_bits.load(Ordering::Acquire));
            let rate = previous * (1.0 - RATE_EMA_ALPHA) + delta * RATE_EMA_ALPHA;
            self.speed_bits.store(rate.to_bits(), Ordering::Release);

            let size = self.size.load(Ordering::Acquire);
            let finished = progress >= size;
            if finished {
                *self.state.lock().unwrap() = DownloadState::Completed;
            }

            let status = self.status();
            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                () = self.bus.publish_core(CoreEvent::DownloadProgressed(status)) => {}
            }

            if finished && !self.completed.swap(true, Ordering::SeqCst) {
                info!(download_id = self.download.id, "download completed");
                self.bus
                    .publish_core(CoreEvent::DownloadCompleted {
                        id: self.download.id,
                    })
                    .await;
                self.cancel_token.cancel();
                break;
            }
        }
    }

    /// Waits for the first chunk failure, shuts the run down, and reports it.
    ///
    /// At most one failure event is emitted per run; the retry decision lives
    /// in the queue manager.
    #[allow(clippy::unwrap_used)]
    async fn run_failure_listener(self: Arc<Self>, mut failures: mpsc::Receiver<DownloadError>) {
        let error = tokio::select! {
            () = self.cancel_token.cancelled() => return,
            received = failures.recv() => match received {
                Some(error) => error,
                None => return,
            },
        };

        warn!(download_id = self.download.id, %error, "download failed");
        self.pause_signal.cancel();
        self.cancel_token.cancel();
        {
            let mut state = self.state.lock().unwrap();
            if *state == DownloadState::InProgress {
                *state = DownloadState::Paused;
            }
        }

        self.bus
            .publish_core(CoreEvent::DownloadFailed {
                id: self.download.id,
                error: error.to_string(),
            })
            .await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ranged_plan_partitions_without_gaps() {
        let chunks = plan_chunks(7, 10_485_760, true);
        assert_eq!(chunks.len(), 10);

        let mut expected_start = 0;
        for chunk in &chunks {
            assert_eq!(chunk.range_start, expected_start, "gap before chunk");
            assert_eq!(chunk.current_pointer, chunk.range_start);
            assert!(!chunk.single_part);
            assert_eq!(chunk.download_id, 7);
            expected_start = chunk.range_end;
        }
        assert_eq!(expected_start, 10_485_760);
    }

    #[test]
    fn ranged_plan_gives_remainder_to_last_chunk() {
        let chunks = plan_chunks(1, 1003, true);
        assert_eq!(chunks.len(), 10);
        assert_eq!(chunks[0].range_end - chunks[0].range_start, 100);
        assert_eq!(chunks[9].range_end, 1003);
        assert_eq!(chunks[9].range_end - chunks[9].range_start, 103);
    }

    #[test]
    fn tiny_ranged_plan_still_partitions() {
        let chunks = plan_chunks(1, 4, true);
        assert_eq!(chunks.len(), 10);
        assert_eq!(chunks.last().unwrap().range_end, 4);
        let total: i64 = chunks.iter().map(|c| c.range_end - c.range_start).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn unranged_plan_is_one_single_part_chunk() {
        let chunks = plan_chunks(3, 4096, false);
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert!(chunk.single_part);
        assert_eq!(chunk.range_start, 0);
        assert_eq!(chunk.range_end, 4096);
        assert_eq!(chunk.current_pointer, 0);
    }

    #[test]
    fn chunk_ids_are_unique() {
        let chunks = plan_chunks(1, 1000, true);
        let mut ids: Vec<_> = chunks.iter().map(|c| c.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), chunks.len());
    }
}
