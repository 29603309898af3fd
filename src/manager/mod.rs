//! Queue manager: admission, dispatch, retries, and scheduling control.
//!
//! The manager is the single externally-visible controller of the engine. It
//! owns the map of active download orchestrators and the per-queue bandwidth
//! limiters, mutates persistent state through the [`Store`], and emits every
//! lifecycle event onto the UI channel. Orchestrators never call back into
//! the manager; their progress, completion, and failure notifications travel
//! through the core event channel and are handled by the
//! [`listen`](listen::listen) loop.
//!
//! # Overview
//!
//! - [`QueueManager::init`] recovers downloads left IN_PROGRESS by a previous
//!   process, resuming each from its persisted chunk positions.
//! - User intents (`create_queue`, `create_download`, `pause_download`, ...)
//!   mutate the store first, then adjust in-memory state, then emit events.
//! - The dispatch helper fills free queue capacity with the oldest PENDING
//!   download after every completion, failure, pause, or deletion.
//! - The [`scheduler`] sweeps schedule-mode queues once a minute, pausing
//!   work outside the daily window and dispatching inside it.

mod error;
pub mod listen;
pub mod scheduler;

pub use error::ManagerError;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::download::{build_client, BandwidthLimiter, DownloadOrchestrator};
use crate::events::{DownloadStatus, EventBus, UiEvent};
use crate::store::{
    DayTime, Download, DownloadState, DownloadWithQueueName, NewQueue, Queue, QueueUpdate, Store,
};

/// Result type for manager operations.
pub type Result<T> = std::result::Result<T, ManagerError>;

/// Mutable maps guarded together by one reader/writer lock.
#[derive(Default)]
struct Inner {
    /// Active orchestrators, keyed by download id. Only IN_PROGRESS
    /// downloads have an entry.
    handlers: HashMap<i64, Arc<DownloadOrchestrator>>,
    /// One limiter per queue, created eagerly with the queue.
    limiters: HashMap<i64, Arc<BandwidthLimiter>>,
}

/// Global admission and lifecycle coordinator.
pub struct QueueManager {
    store: Store,
    bus: EventBus,
    client: Client,
    inner: RwLock<Inner>,
}

impl QueueManager {
    /// Constructs the manager, materializes one limiter per stored queue,
    /// and resumes every download the previous process left IN_PROGRESS.
    ///
    /// Recovery resumes from persisted chunk positions, so a crash costs at
    /// most one upsert window of duplicated traffic per chunk. A download
    /// whose recovery fails (for example, the server became unreachable) is
    /// moved to PAUSED and logged rather than blocking startup.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] if queues or downloads cannot be read.
    #[instrument(skip_all)]
    pub async fn init(store: Store, bus: EventBus) -> Result<Arc<Self>> {
        let manager = Arc::new(Self {
            store,
            bus,
            client: build_client(),
            inner: RwLock::new(Inner::default()),
        });

        let queues = manager.store.list_queues().await?;
        {
            let mut inner = manager.inner.write().await;
            for queue in &queues {
                inner
                    .limiters
                    .insert(queue.id, Arc::new(BandwidthLimiter::new(queue.max_bandwidth)));
            }
        }
        info!(queue_count = queues.len(), "limiters materialized");

        let interrupted = manager
            .store
            .get_downloads_by_state(DownloadState::InProgress)
            .await?;
        for download in interrupted {
            let id = download.id;
            if let Err(err) = manager.spawn_orchestrator(&download).await {
                warn!(download_id = id, error = %err, "recovery failed, pausing download");
                if let Err(err) = manager.store.set_download_state(id, DownloadState::Paused).await
                {
                    error!(download_id = id, error = %err, "failed to park unrecoverable download");
                }
            } else {
                info!(download_id = id, "recovered in-progress download");
            }
        }

        Ok(manager)
    }

    // ---- queues ----

    /// Creates a queue, eagerly allocates its bandwidth limiter, and emits
    /// [`UiEvent::QueueCreated`].
    ///
    /// # Errors
    ///
    /// Returns a validation error for a relative directory, a concurrency
    /// cap below 1, a negative retry limit, or schedule mode without both
    /// window times; [`ManagerError::Store`] if the insert fails.
    #[instrument(skip(self, params), fields(name = %params.name))]
    pub async fn create_queue(&self, params: NewQueue) -> Result<Queue> {
        validate_queue_settings(
            &params.directory,
            params.max_concurrent,
            params.retry_limit,
            params.schedule_mode,
            params.start_download,
            params.end_download,
        )?;

        let queue = self.store.create_queue(&params).await?;
        {
            let mut inner = self.inner.write().await;
            inner
                .limiters
                .insert(queue.id, Arc::new(BandwidthLimiter::new(queue.max_bandwidth)));
        }

        info!(queue_id = queue.id, "queue created");
        self.bus.publish_ui(UiEvent::QueueCreated(queue.clone())).await;
        Ok(queue)
    }

    /// Edits a queue and reconfigures its limiter in place, so every running
    /// fetcher in the queue observes the new ceiling within one wait round.
    ///
    /// # Errors
    ///
    /// Returns the same validation errors as [`create_queue`](Self::create_queue),
    /// or [`ManagerError::Store`] if the queue does not exist.
    #[instrument(skip(self, params), fields(queue_id = params.id))]
    pub async fn edit_queue(&self, params: QueueUpdate) -> Result<Queue> {
        validate_queue_settings(
            &params.directory,
            params.max_concurrent,
            params.retry_limit,
            params.schedule_mode,
            params.start_download,
            params.end_download,
        )?;

        let queue = self.store.update_queue(&params).await?;
        {
            let mut inner = self.inner.write().await;
            match inner.limiters.get(&queue.id) {
                Some(limiter) => limiter.set_rate(queue.max_bandwidth),
                None => {
                    inner
                        .limiters
                        .insert(queue.id, Arc::new(BandwidthLimiter::new(queue.max_bandwidth)));
                }
            }
        }

        info!(queue_id = queue.id, "queue updated");
        self.bus.publish_ui(UiEvent::QueueEdited(queue.clone())).await;
        Ok(queue)
    }

    /// Deletes a queue: pauses and removes its active orchestrators, drops
    /// its limiter, and deletes the row (downloads and chunks cascade).
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] if the queue does not exist.
    #[instrument(skip(self))]
    pub async fn delete_queue(&self, id: i64) -> Result<()> {
        let orphaned = {
            let mut inner = self.inner.write().await;
            inner.limiters.remove(&id);
            let ids: Vec<i64> = inner
                .handlers
                .values()
                .filter(|h| h.queue_id() == id)
                .map(|h| h.download_id())
                .collect();
            ids.into_iter()
                .filter_map(|download_id| inner.handlers.remove(&download_id))
                .collect::<Vec<_>>()
        };
        for handler in orphaned {
            handler.pause().await;
        }

        self.store.delete_queue(id).await?;
        info!(queue_id = id, "queue deleted");
        self.bus.publish_ui(UiEvent::QueueDeleted { id }).await;
        Ok(())
    }

    /// Lists all queues for display.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] if the query fails.
    pub async fn list_queues(&self) -> Result<Vec<Queue>> {
        Ok(self.store.list_queues().await?)
    }

    // ---- downloads ----

    /// Creates a download in the given queue and attempts to dispatch it.
    ///
    /// When `file_name` is absent it is derived from the URL's last path
    /// segment. The save path is the queue directory joined with the file
    /// name. The download is inserted PENDING and starts immediately only if
    /// the queue has free capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidUrl`] for an unparseable or
    /// non-HTTP(S) URL, [`ManagerError::EmptyFileName`] when no name can be
    /// derived, and [`ManagerError::Store`] for an unknown queue.
    #[instrument(skip(self, url), fields(url = %url))]
    pub async fn create_download(
        &self,
        url: &str,
        file_name: Option<&str>,
        queue_id: i64,
    ) -> Result<Download> {
        let parsed = Url::parse(url).map_err(|_| ManagerError::InvalidUrl {
            url: url.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(ManagerError::InvalidUrl {
                url: url.to_string(),
            });
        }

        let name = match file_name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => derive_file_name(&parsed).ok_or_else(|| ManagerError::EmptyFileName {
                url: url.to_string(),
            })?,
        };

        let queue = self.store.get_queue(queue_id).await?;
        let save_path = Path::new(&queue.directory).join(&name);

        let download = self
            .store
            .create_download(
                queue_id,
                url,
                &save_path.to_string_lossy(),
                DownloadState::Pending,
            )
            .await?;
        info!(download_id = download.id, "download created");

        self.bus
            .publish_ui(UiEvent::DownloadCreated(DownloadWithQueueName {
                id: download.id,
                queue_id: download.queue_id,
                url: download.url.clone(),
                save_path: download.save_path.clone(),
                state: download.state,
                retries: download.retries,
                queue_name: queue.name,
            }))
            .await;

        self.start_next_if_possible(queue_id).await?;
        Ok(download)
    }

    /// Pauses an IN_PROGRESS download and dispatches the next pending one to
    /// fill the vacated capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotInProgress`] if the download is not
    /// running, and [`ManagerError::OrchestratorMissing`] if the state says
    /// IN_PROGRESS but no orchestrator exists in memory.
    #[instrument(skip(self))]
    pub async fn pause_download(&self, id: i64) -> Result<()> {
        let download = self.store.get_download(id).await?;
        if download.state != DownloadState::InProgress {
            return Err(ManagerError::NotInProgress {
                id,
                state: download.state,
            });
        }

        let handler = self.inner.write().await.handlers.remove(&id);
        let Some(handler) = handler else {
            error!(download_id = id, "IN_PROGRESS download has no orchestrator");
            return Err(ManagerError::OrchestratorMissing { id });
        };
        handler.pause().await;

        self.set_download_state(id, DownloadState::Paused).await?;
        info!(download_id = id, "download paused");

        self.start_next_if_possible(download.queue_id).await?;
        Ok(())
    }

    /// Resumes a download from its persisted chunk positions.
    ///
    /// Also the dispatch path: PENDING downloads are started through here.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::AlreadyInProgress`] if an orchestrator is
    /// already running for this id, or a startup error from the probe,
    /// chunk persistence, or the output file.
    #[instrument(skip(self))]
    pub async fn resume_download(&self, id: i64) -> Result<()> {
        let download = self.store.get_download(id).await?;
        if self.inner.read().await.handlers.contains_key(&id) {
            return Err(ManagerError::AlreadyInProgress { id });
        }

        self.set_download_state(id, DownloadState::InProgress).await?;

        if let Err(err) = self.spawn_orchestrator(&download).await {
            // Roll the row back so the download can be retried by hand.
            warn!(download_id = id, error = %err, "failed to start download");
            if let Err(err) = self.set_download_state(id, DownloadState::Paused).await {
                error!(download_id = id, error = %err, "failed to roll back download state");
            }
            return Err(err);
        }

        info!(download_id = id, "download resumed");
        Ok(())
    }

    /// Resets the retry counter and resumes the download.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`resume_download`](Self::resume_download).
    #[instrument(skip(self))]
    pub async fn retry_download(&self, id: i64) -> Result<()> {
        self.store.set_download_retries(id, 0).await?;
        info!(download_id = id, "retrying download");
        self.resume_download(id).await
    }

    /// Deletes a download. An active download is cancelled first, which
    /// removes its partial output file; for inactive downloads any partial
    /// file is left on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] if the download does not exist.
    #[instrument(skip(self))]
    pub async fn delete_download(&self, id: i64) -> Result<()> {
        let download = self.store.get_download(id).await?;

        let handler = self.inner.write().await.handlers.remove(&id);
        let was_active = handler.is_some();
        if let Some(handler) = handler {
            handler.cancel().await;
        }

        self.store.delete_download(id).await?;
        info!(download_id = id, "download deleted");
        self.bus.publish_ui(UiEvent::DownloadDeleted { id }).await;

        if was_active {
            self.start_next_if_possible(download.queue_id).await?;
        }
        Ok(())
    }

    /// Lists all downloads joined with their queue names, for display.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] if the query fails.
    pub async fn list_downloads_with_queue_name(&self) -> Result<Vec<DownloadWithQueueName>> {
        Ok(self.store.list_downloads_with_queue_name().await?)
    }

    // ---- core event callbacks ----

    /// Handles a download failure: retries while the queue's retry budget
    /// lasts, otherwise marks the download FAILED and dispatches the next.
    ///
    /// A retry shares the partial progress persisted so far; only the retry
    /// counter betrays that it happened.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] if the download or queue cannot be
    /// read or updated.
    #[instrument(skip(self))]
    pub async fn download_failed(&self, id: i64) -> Result<()> {
        let handler = self.inner.write().await.handlers.remove(&id);
        if let Some(handler) = handler {
            // Join remaining fetchers and release the file handle before any
            // new orchestrator touches the same path.
            handler.pause().await;
        }

        let download = self.store.get_download(id).await?;
        let queue = self.store.get_queue(download.queue_id).await?;

        if download.retries < queue.retry_limit {
            self.store
                .set_download_retries(id, download.retries + 1)
                .await?;
            info!(
                download_id = id,
                retry = download.retries + 1,
                limit = queue.retry_limit,
                "retrying failed download"
            );
            return self.resume_download(id).await;
        }

        self.set_download_state(id, DownloadState::Failed).await?;
        warn!(download_id = id, "download failed, retries exhausted");

        self.start_next_if_possible(download.queue_id).await?;
        Ok(())
    }

    /// Handles a completed download: marks it COMPLETED, removes its
    /// orchestrator, and dispatches the next pending download.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] if the state update fails.
    #[instrument(skip(self))]
    pub async fn download_completed(&self, id: i64) -> Result<()> {
        let handler = self.inner.write().await.handlers.remove(&id);
        if let Some(handler) = handler {
            handler.pause().await;
        }

        let download = self.store.get_download(id).await?;
        self.set_download_state(id, DownloadState::Completed).await?;
        info!(download_id = id, "download completed");

        self.start_next_if_possible(download.queue_id).await?;
        Ok(())
    }

    /// Persists every chunk position in a progress snapshot.
    ///
    /// Individual upsert failures are logged and skipped; one bad row must
    /// not stall progress persistence for the rest.
    #[instrument(skip(self, status), fields(download_id = status.id))]
    pub async fn upsert_chunks(&self, status: &DownloadStatus) {
        for chunk in &status.chunks {
            if let Err(err) = self.store.upsert_download_chunk(chunk).await {
                error!(
                    chunk_id = %chunk.id,
                    download_id = chunk.download_id,
                    error = %err,
                    "failed to upsert chunk position"
                );
            }
        }
    }

    // ---- dispatch ----

    /// Starts the oldest PENDING download of a queue if the queue has free
    /// capacity. A queue at its cap or with nothing pending is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] if the queue cannot be read, or a
    /// startup error from the dispatched download.
    #[instrument(skip(self))]
    pub async fn start_next_if_possible(&self, queue_id: i64) -> Result<()> {
        let active = {
            let inner = self.inner.read().await;
            inner
                .handlers
                .values()
                .filter(|h| h.queue_id() == queue_id)
                .count() as i64
        };

        let queue = self.store.get_queue(queue_id).await?;
        if active >= queue.max_concurrent {
            debug!(
                queue_id,
                active,
                max_concurrent = queue.max_concurrent,
                "queue at capacity"
            );
            return Ok(());
        }

        let Some(next) = self.store.get_pending_download_by_queue_id(queue_id).await? else {
            return Ok(());
        };

        info!(queue_id, download_id = next.id, "dispatching next download");
        self.resume_download(next.id).await
    }

    // ---- scheduling ----

    /// Reconciles every schedule-mode queue against the given wall-clock
    /// time. Normally invoked by the [`scheduler`] loop once a minute.
    ///
    /// Inside the window, dispatches up to `max_concurrent` downloads.
    /// Outside it, moves the queue's IN_PROGRESS downloads back to PENDING
    /// and pauses their orchestrators; they re-dispatch when the window next
    /// opens. Errors are logged per queue so one broken queue cannot starve
    /// the others.
    pub async fn window_sweep(&self, now: DayTime) {
        let queues = match self.store.list_queues().await {
            Ok(queues) => queues,
            Err(err) => {
                error!(error = %err, "window sweep could not list queues");
                return;
            }
        };

        for queue in queues.into_iter().filter(|q| q.schedule_mode) {
            let (Some(start), Some(end)) = (queue.start_download, queue.end_download) else {
                warn!(queue_id = queue.id, "schedule mode without window times");
                continue;
            };

            if DayTime::window_contains(start, end, now) {
                for _ in 0..queue.max_concurrent {
                    if let Err(err) = self.start_next_if_possible(queue.id).await {
                        warn!(queue_id = queue.id, error = %err, "window dispatch failed");
                        break;
                    }
                }
            } else {
                if let Err(err) = self
                    .store
                    .update_in_progress_to_pending_in_queue(queue.id)
                    .await
                {
                    error!(queue_id = queue.id, error = %err, "failed to park window downloads");
                    continue;
                }

                let handlers = {
                    let mut inner = self.inner.write().await;
                    let ids: Vec<i64> = inner
                        .handlers
                        .values()
                        .filter(|h| h.queue_id() == queue.id)
                        .map(|h| h.download_id())
                        .collect();
                    ids.into_iter()
                        .filter_map(|id| inner.handlers.remove(&id))
                        .collect::<Vec<_>>()
                };
                for handler in handlers {
                    debug!(
                        queue_id = queue.id,
                        download_id = handler.download_id(),
                        "window closed, pausing download"
                    );
                    handler.pause().await;
                }
            }
        }
    }

    // ---- internals ----

    /// Sets a download's state in the store, then emits the state-change
    /// event. The event is only published after the mutation succeeds.
    async fn set_download_state(&self, id: i64, state: DownloadState) -> Result<()> {
        self.store.set_download_state(id, state).await?;
        self.bus
            .publish_ui(UiEvent::DownloadStateChanged { id, state })
            .await;
        Ok(())
    }

    /// Builds, registers, and starts an orchestrator for a download.
    async fn spawn_orchestrator(&self, download: &Download) -> Result<()> {
        let chunks = self
            .store
            .get_download_chunks_by_download_id(download.id)
            .await?;
        let limiter = self.limiter_for_queue(download.queue_id).await?;

        let orchestrator = DownloadOrchestrator::new(
            download.clone(),
            chunks,
            limiter,
            self.store.clone(),
            self.bus.clone(),
            self.client.clone(),
        );

        {
            let mut inner = self.inner.write().await;
            if inner.handlers.contains_key(&download.id) {
                return Err(ManagerError::AlreadyInProgress { id: download.id });
            }
            inner.handlers.insert(download.id, Arc::clone(&orchestrator));
        }

        if let Err(err) = Arc::clone(&orchestrator).start().await {
            self.inner.write().await.handlers.remove(&download.id);
            return Err(err.into());
        }
        Ok(())
    }

    /// Returns the queue's limiter, recreating it defensively if the map has
    /// no entry (the queue row is the source of truth for the rate).
    async fn limiter_for_queue(&self, queue_id: i64) -> Result<Arc<BandwidthLimiter>> {
        if let Some(limiter) = self.inner.read().await.limiters.get(&queue_id) {
            return Ok(Arc::clone(limiter));
        }

        warn!(queue_id, "limiter missing, recreating from queue settings");
        let queue = self.store.get_queue(queue_id).await?;
        let limiter = Arc::new(BandwidthLimiter::new(queue.max_bandwidth));
        let mut inner = self.inner.write().await;
        Ok(Arc::clone(
            inner
                .limiters
                .entry(queue_id)
                .or_insert_with(|| Arc::clone(&limiter)),
        ))
    }
}

/// Validates queue settings shared by create and edit.
fn validate_queue_settings(
    directory: &str,
    max_concurrent: i64,
    retry_limit: i64,
    schedule_mode: bool,
    start: Option<DayTime>,
    end: Option<DayTime>,
) -> Result<()> {
    if !Path::new(directory).is_absolute() {
        return Err(ManagerError::RelativeDirectory {
            directory: directory.to_string(),
        });
    }
    if max_concurrent < 1 {
        return Err(ManagerError::InvalidMaxConcurrent {
            value: max_concurrent,
        });
    }
    if retry_limit < 0 {
        return Err(ManagerError::InvalidRetryLimit { value: retry_limit });
    }
    if schedule_mode && (start.is_none() || end.is_none()) {
        return Err(ManagerError::MissingScheduleWindow);
    }
    Ok(())
}

/// Derives a file name from the URL's last non-empty path segment.
fn derive_file_name(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(ToString::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn test_manager() -> (Arc<QueueManager>, Store) {
        let db = Database::open_in_memory().await.unwrap();
        let store = Store::new(db);
        let (bus, _core_rx, mut ui_rx) = EventBus::new();
        // Keep the UI channel drained so publishes never back-pressure tests.
        tokio::spawn(async move { while ui_rx.recv().await.is_some() {} });
        let manager = QueueManager::init(store.clone(), bus).await.unwrap();
        (manager, store)
    }

    fn queue_params(directory: &str) -> NewQueue {
        NewQueue {
            name: "main".into(),
            directory: directory.into(),
            max_bandwidth: None,
            start_download: None,
            end_download: None,
            retry_limit: 2,
            schedule_mode: false,
            max_concurrent: 2,
        }
    }

    #[test]
    fn file_name_comes_from_last_path_segment() {
        let url = Url::parse("https://example.com/files/archive/report.pdf?x=1").unwrap();
        assert_eq!(derive_file_name(&url).unwrap(), "report.pdf");

        let url = Url::parse("https://example.com/files/dir/").unwrap();
        assert_eq!(derive_file_name(&url).unwrap(), "dir");

        let url = Url::parse("https://example.com/").unwrap();
        assert!(derive_file_name(&url).is_none());
    }

    #[tokio::test]
    async fn create_queue_rejects_bad_settings() {
        let (manager, _store) = test_manager().await;

        assert!(matches!(
            manager.create_queue(queue_params("relative/dir")).await,
            Err(ManagerError::RelativeDirectory { .. })
        ));

        let mut params = queue_params("/tmp/dl");
        params.max_concurrent = 0;
        assert!(matches!(
            manager.create_queue(params).await,
            Err(ManagerError::InvalidMaxConcurrent { value: 0 })
        ));

        let mut params = queue_params("/tmp/dl");
        params.retry_limit = -1;
        assert!(matches!(
            manager.create_queue(params).await,
            Err(ManagerError::InvalidRetryLimit { value: -1 })
        ));

        let mut params = queue_params("/tmp/dl");
        params.schedule_mode = true;
        assert!(matches!(
            manager.create_queue(params).await,
            Err(ManagerError::MissingScheduleWindow)
        ));
    }

    #[tokio::test]
    async fn create_download_validates_url_and_name() {
        let (manager, _store) = test_manager().await;
        let queue = manager.create_queue(queue_params("/tmp/dl")).await.unwrap();

        assert!(matches!(
            manager.create_download("not a url", None, queue.id).await,
            Err(ManagerError::InvalidUrl { .. })
        ));
        assert!(matches!(
            manager
                .create_download("ftp://example.com/f.bin", None, queue.id)
                .await,
            Err(ManagerError::InvalidUrl { .. })
        ));
        assert!(matches!(
            manager
                .create_download("https://example.com/", None, queue.id)
                .await,
            Err(ManagerError::EmptyFileName { .. })
        ));
    }

    #[tokio::test]
    async fn create_download_joins_queue_directory() {
        let (manager, store) = test_manager().await;
        let queue = manager.create_queue(queue_params("/tmp/dl")).await.unwrap();

        // The dispatch attempt fails against the unreachable host, which is
        // fine: the row itself must exist with the derived save path.
        let _ = manager
            .create_download("http://127.0.0.1:9/pkg/tool.tar.gz", None, queue.id)
            .await;

        let rows = store.list_downloads_with_queue_name().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].save_path, "/tmp/dl/tool.tar.gz");
    }

    #[tokio::test]
    async fn create_download_unknown_queue_fails() {
        let (manager, _store) = test_manager().await;
        assert!(matches!(
            manager
                .create_download("https://example.com/f.bin", None, 77)
                .await,
            Err(ManagerError::Store(crate::store::StoreError::QueueNotFound(77)))
        ));
    }

    #[tokio::test]
    async fn pause_requires_in_progress_state() {
        let (manager, store) = test_manager().await;
        let queue = manager.create_queue(queue_params("/tmp/dl")).await.unwrap();
        let download = store
            .create_download(queue.id, "https://example.com/f", "/tmp/dl/f", DownloadState::Paused)
            .await
            .unwrap();

        assert!(matches!(
            manager.pause_download(download.id).await,
            Err(ManagerError::NotInProgress {
                state: DownloadState::Paused,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn in_progress_without_orchestrator_is_invariant_violation() {
        let (manager, store) = test_manager().await;
        let queue = manager.create_queue(queue_params("/tmp/dl")).await.unwrap();
        let download = store
            .create_download(
                queue.id,
                "https://example.com/f",
                "/tmp/dl/f",
                DownloadState::InProgress,
            )
            .await
            .unwrap();

        assert!(matches!(
            manager.pause_download(download.id).await,
            Err(ManagerError::OrchestratorMissing { .. })
        ));
    }

    #[tokio::test]
    async fn closed_window_parks_pending_rows() {
        let (manager, store) = test_manager().await;
        let mut params = queue_params("/tmp/dl");
        params.schedule_mode = true;
        params.start_download = Some("10:00:00".parse().unwrap());
        params.end_download = Some("12:00:00".parse().unwrap());
        let queue = manager.create_queue(params).await.unwrap();

        let download = store
            .create_download(
                queue.id,
                "https://example.com/f",
                "/tmp/dl/f",
                DownloadState::InProgress,
            )
            .await
            .unwrap();

        manager.window_sweep("13:00:00".parse().unwrap()).await;

        assert_eq!(
            store.get_download(download.id).await.unwrap().state,
            DownloadState::Pending
        );
    }

    #[tokio::test]
    async fn sweep_ignores_non_scheduled_queues() {
        let (manager, store) = test_manager().await;
        let queue = manager.create_queue(queue_params("/tmp/dl")).await.unwrap();
        let download = store
            .create_download(
                queue.id,
                "https://example.com/f",
                "/tmp/dl/f",
                DownloadState::InProgress,
            )
            .await
            .unwrap();

        manager.window_sweep("13:00:00".parse().unwrap()).await;

        assert_eq!(
            store.get_download(download.id).await.unwrap().state,
            DownloadState::InProgress
        );
    }

    #[tokio::test]
    async fn deleting_queue_drops_limiter_and_rows() {
        let (manager, store) = test_manager().await;
        let queue = manager.create_queue(queue_params("/tmp/dl")).await.unwrap();
        store
            .create_download(queue.id, "https://example.com/f", "/tmp/dl/f", DownloadState::Pending)
            .await
            .unwrap();

        manager.delete_queue(queue.id).await.unwrap();

        assert!(store.list_downloads_with_queue_name().await.unwrap().is_empty());
        assert!(manager.inner.read().await.limiters.is_empty());
    }
}
