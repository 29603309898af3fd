//! Download engine: probing, chunked range fetching, bandwidth shaping, and
//! per-download orchestration.
//!
//! # Overview
//!
//! A download run is driven by a [`DownloadOrchestrator`], which probes the
//! server once, partitions the resource into chunks, and spawns one
//! [`ChunkFetcher`] per chunk. Every fetcher of every download in a queue
//! shares that queue's [`BandwidthLimiter`], and all fetchers of one download
//! share one [`PositionalWriter`]. Progress flows out through the core event
//! channel once per second.

mod chunk;
pub mod constants;
mod error;
mod limiter;
mod orchestrator;
mod probe;
mod writer;

pub use chunk::{ChunkFetcher, ChunkProgress};
pub use error::DownloadError;
pub use limiter::{BandwidthLimiter, WaitCancelled};
pub use orchestrator::DownloadOrchestrator;
pub use probe::{build_client, probe, ProbeResult};
pub use writer::PositionalWriter;
