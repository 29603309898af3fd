//! Typed event channels coupling the core to its consumers.
//!
//! Two bounded channels: `core_events` carries progress, completion, and
//! failure notifications from download orchestrators to the queue manager;
//! `ui_events` carries the same logical events plus lifecycle notifications
//! from the manager out to observers. The manager republishes a core event
//! onto `ui_events` only after handling it, so observers always see effects
//! post-persistence.
//!
//! Both buffers are bounded: a full `ui_events` buffer back-pressures the
//! manager's event loop, and a full `core_events` buffer back-pressures
//! orchestrators.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::store::{DownloadChunk, DownloadState, DownloadWithQueueName, Queue};

/// Capacity of both event channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Structural snapshot of a running download, produced once per progress
/// tick and consumed by the manager for chunk persistence.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadStatus {
    /// Download identifier.
    pub id: i64,
    /// Aggregated progress in percent of total size.
    pub progress_percentage: f64,
    /// Exponentially-smoothed byte rate estimate, bytes per second.
    pub speed: f64,
    /// Lifecycle state at snapshot time.
    pub state: DownloadState,
    /// Per-chunk positions at snapshot time.
    pub chunks: Vec<DownloadChunk>,
}

/// Events published by orchestrators, consumed by the queue manager.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// Periodic progress snapshot (once per second per download).
    DownloadProgressed(DownloadStatus),
    /// All chunks delivered; published at most once per run.
    DownloadCompleted {
        /// Download identifier.
        id: i64,
    },
    /// A chunk pushed an unrecoverable error; at most one per run.
    DownloadFailed {
        /// Download identifier.
        id: i64,
        /// Rendered error message.
        error: String,
    },
}

/// Events published by the queue manager, consumed by UI observers.
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// Mirrors [`CoreEvent::DownloadProgressed`], post-persistence.
    DownloadProgressed(DownloadStatus),
    /// Mirrors [`CoreEvent::DownloadCompleted`], post-persistence.
    DownloadCompleted {
        /// Download identifier.
        id: i64,
    },
    /// Mirrors [`CoreEvent::DownloadFailed`], post-persistence.
    DownloadFailed {
        /// Download identifier.
        id: i64,
        /// Rendered error message.
        error: String,
    },
    /// A download's lifecycle state changed in the store.
    DownloadStateChanged {
        /// Download identifier.
        id: i64,
        /// The new state.
        state: DownloadState,
    },
    /// A queue was created.
    QueueCreated(Queue),
    /// A queue was edited.
    QueueEdited(Queue),
    /// A queue was deleted (cascading to its downloads).
    QueueDeleted {
        /// Queue identifier.
        id: i64,
    },
    /// A download was created.
    DownloadCreated(DownloadWithQueueName),
    /// A download was deleted.
    DownloadDeleted {
        /// Download identifier.
        id: i64,
    },
}

/// Sending half of both event channels.
///
/// Cheap to clone; handed to every orchestrator at construction instead of a
/// back-reference to the queue manager.
#[derive(Debug, Clone)]
pub struct EventBus {
    core_tx: mpsc::Sender<CoreEvent>,
    ui_tx: mpsc::Sender<UiEvent>,
}

impl EventBus {
    /// Creates the bus and returns it together with the receiving halves.
    ///
    /// The core receiver belongs to the manager's event loop; the UI receiver
    /// is handed to whatever observes the engine.
    #[must_use]
    pub fn new() -> (Self, mpsc::Receiver<CoreEvent>, mpsc::Receiver<UiEvent>) {
        let (core_tx, core_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (ui_tx, ui_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self { core_tx, ui_tx }, core_rx, ui_rx)
    }

    /// Publishes a core event, suspending while the buffer is full.
    pub async fn publish_core(&self, event: CoreEvent) {
        if self.core_tx.send(event).await.is_err() {
            warn!("core event dropped: receiver closed");
        }
    }

    /// Publishes a UI event, suspending while the buffer is full.
    pub async fn publish_ui(&self, event: UiEvent) {
        if self.ui_tx.send(event).await.is_err() {
            warn!("ui event dropped: receiver closed");
        }
    }
}
