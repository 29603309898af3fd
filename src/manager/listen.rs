//! Core event loop: drains orchestrator events, persists their effects, and
//! republishes them for UI observers.
//!
//! Republishing happens strictly after handling, so an observer that sees
//! `DownloadCompleted` can immediately read the COMPLETED row from the
//! store. The loop holds no manager lock across a channel send.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::events::{CoreEvent, UiEvent};

use super::QueueManager;

/// Runs until the core channel closes, which happens when every orchestrator
/// and the manager's own sender have been dropped.
pub async fn listen(manager: Arc<QueueManager>, mut core_events: mpsc::Receiver<CoreEvent>) {
    info!("core event loop started");

    while let Some(event) = core_events.recv().await {
        match &event {
            CoreEvent::DownloadProgressed(status) => {
                debug!(
                    download_id = status.id,
                    progress = status.progress_percentage,
                    "progress tick"
                );
                manager.upsert_chunks(status).await;
            }
            CoreEvent::DownloadCompleted { id } => {
                if let Err(err) = manager.download_completed(*id).await {
                    error!(download_id = id, error = %err, "completion handling failed");
                }
            }
            CoreEvent::DownloadFailed { id, error } => {
                if let Err(err) = manager.download_failed(*id).await {
                    error!(
                        download_id = id,
                        cause = %error,
                        error = %err,
                        "failure handling failed"
                    );
                }
            }
        }

        let mirrored = match event {
            CoreEvent::DownloadProgressed(status) => UiEvent::DownloadProgressed(status),
            CoreEvent::DownloadCompleted { id } => UiEvent::DownloadCompleted { id },
            CoreEvent::DownloadFailed { id, error } => UiEvent::DownloadFailed { id, error },
        };
        manager.bus.publish_ui(mirrored).await;
    }

    info!("core event loop stopped");
}
