//! fetchq: multi-queue download manager engine.
//!
//! The engine organizes downloads into named queues, each independently
//! regulating how many downloads run concurrently, their aggregate bandwidth
//! ceiling, and whether work may only progress during a daily time window.
//! Per-chunk progress is persisted so downloads resume across process
//! restarts without refetching stored bytes.
//!
//! # Architecture
//!
//! - [`db`] - SQLite connection and schema management
//! - [`store`] - persistence for queues, downloads, and chunks
//! - [`download`] - chunked range fetching, bandwidth shaping, orchestration
//! - [`manager`] - admission, dispatch, retries, and window scheduling
//! - [`events`] - the channels coupling orchestrators, manager, and observers
//! - [`datadir`] / [`logging`] - platform data directory and log setup

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod datadir;
pub mod db;
pub mod download;
pub mod events;
pub mod logging;
pub mod manager;
pub mod store;

// Re-export commonly used types
pub use db::Database;
pub use download::{
    BandwidthLimiter, ChunkFetcher, DownloadError, DownloadOrchestrator, PositionalWriter,
};
pub use events::{CoreEvent, DownloadStatus, EventBus, UiEvent};
pub use manager::{ManagerError, QueueManager};
pub use store::{
    DayTime, Download, DownloadChunk, DownloadState, DownloadWithQueueName, NewQueue, Queue,
    QueueUpdate, Store, StoreError,
};
