//! Tuning constants for the download engine.

use std::time::Duration;

/// Connect timeout for HTTP requests, in seconds.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Read timeout for HTTP requests, in seconds. Generous to accommodate large
/// bodies on slow links.
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Number of chunks a ranged download is partitioned into.
pub const CHUNK_COUNT: i64 = 10;

/// Size of the slices streamed through the limiter into the writer.
pub const SLICE_SIZE: usize = 16 * 1024;

/// Period of the per-download progress ticker.
pub const PROGRESS_TICK: Duration = Duration::from_secs(1);

/// Smoothing factor of the byte-rate estimator; weights the current sample
/// heavily so the displayed speed reacts within a few ticks.
pub const RATE_EMA_ALPHA: f64 = 0.75;

/// Floor for the limiter's burst size, in bytes.
pub const MIN_BURST_BYTES: i64 = 65_536;
