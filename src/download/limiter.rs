//! Shared token-bucket bandwidth limiter.
//!
//! One limiter exists per queue and is shared by every concurrent chunk
//! fetcher of every download in that queue, so the configured ceiling bounds
//! the queue's aggregate throughput rather than any single connection.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fetchq::download::BandwidthLimiter;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let limiter = Arc::new(BandwidthLimiter::new(Some(1_000_000)));
//! let cancel = CancellationToken::new();
//! // Suspends until 16 KiB worth of tokens accrue.
//! limiter.wait(&cancel, 16 * 1024).await.unwrap();
//! # }
//! ```

use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::constants::MIN_BURST_BYTES;

/// Error returned when a limiter wait is abandoned by cancellation.
///
/// No tokens are consumed on this path.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("bandwidth wait cancelled")]
pub struct WaitCancelled;

/// Token bucket state. `None` inside the limiter means unlimited.
#[derive(Debug)]
struct Bucket {
    /// Refill rate in bytes per second.
    rate: f64,
    /// Maximum accumulated tokens.
    burst: f64,
    /// Currently available tokens.
    tokens: f64,
    /// Last refill instant.
    updated: Instant,
}

impl Bucket {
    fn new(rate: i64) -> Self {
        let rate = rate as f64;
        let burst = rate.max(MIN_BURST_BYTES as f64);
        Self {
            rate,
            burst,
            tokens: burst,
            updated: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.updated).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.updated = now;
    }

    /// Takes `n` tokens if available, otherwise returns how long until they
    /// will have accrued.
    fn try_take(&mut self, n: f64, now: Instant) -> Option<Duration> {
        // A request larger than the burst could never be satisfied whole.
        let n = n.min(self.burst);
        self.refill(now);
        if self.tokens >= n {
            self.tokens -= n;
            None
        } else {
            Some(Duration::from_secs_f64((n - self.tokens) / self.rate))
        }
    }
}

/// Token-bucket pacer for aggregate byte throughput.
///
/// Thread-safe; `wait` may be called concurrently by many fetchers. The
/// bucket's burst is at least the rate (one second of traffic) and at least
/// 64 KiB, so slice-sized requests always fit.
#[derive(Debug)]
pub struct BandwidthLimiter {
    bucket: Mutex<Option<Bucket>>,
}

impl BandwidthLimiter {
    /// Creates a limiter with the given rate in bytes per second.
    ///
    /// `None` or a non-positive rate produces an unlimited limiter.
    #[must_use]
    pub fn new(rate: Option<i64>) -> Self {
        Self {
            bucket: Mutex::new(rate.filter(|r| *r > 0).map(Bucket::new)),
        }
    }

    /// Creates a limiter that never delays callers.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Returns whether the limiter is in unlimited mode.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned, which cannot happen since no
    /// code path panics while holding it.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn is_unlimited(&self) -> bool {
        self.bucket.lock().unwrap().is_none()
    }

    /// Atomically swaps the bucket for a new rate.
    ///
    /// Pending waiters pick the new rate up on their next wait round. A rate
    /// of `None` or `<= 0` transitions silently to unlimited mode.
    #[allow(clippy::unwrap_used)]
    pub fn set_rate(&self, rate: Option<i64>) {
        *self.bucket.lock().unwrap() = rate.filter(|r| *r > 0).map(Bucket::new);
    }

    /// Takes `n` tokens without blocking if they are available.
    ///
    /// Always true in unlimited mode.
    #[allow(clippy::unwrap_used)]
    pub fn allow(&self, n: usize) -> bool {
        match self.bucket.lock().unwrap().as_mut() {
            None => true,
            Some(bucket) => bucket.try_take(n as f64, Instant::now()).is_none(),
        }
    }

    /// Suspends the caller until `n` tokens are available or `cancel` fires.
    ///
    /// Returns immediately in unlimited mode. On cancellation no tokens are
    /// consumed: tokens are only deducted in the round that succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`WaitCancelled`] when the cancellation token fires first.
    #[allow(clippy::unwrap_used)]
    pub async fn wait(&self, cancel: &CancellationToken, n: usize) -> Result<(), WaitCancelled> {
        loop {
            let delay = {
                let mut guard = self.bucket.lock().unwrap();
                match guard.as_mut() {
                    None => return Ok(()),
                    Some(bucket) => bucket.try_take(n as f64, Instant::now()),
                }
            };

            match delay {
                None => return Ok(()),
                Some(delay) => {
                    tokio::select! {
                        () = cancel.cancelled() => return Err(WaitCancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
