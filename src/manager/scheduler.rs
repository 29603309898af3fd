//! Periodic window sweep driving queue schedule enforcement.
//!
//! Every tick the scheduler reconciles each schedule-mode queue against the
//! local wall clock: downloads run only while "now" falls inside the queue's
//! daily `[start, end)` window, with `end < start` wrapping midnight.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Timelike};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::store::DayTime;

use super::QueueManager;

/// Period of the window sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The current local wall-clock time of day.
#[must_use]
#[allow(clippy::unwrap_used)]
pub fn local_now() -> DayTime {
    let now = Local::now();
    // Hour/minute/second from chrono are always within range.
    DayTime::new(now.hour() as u8, now.minute() as u8, now.second() as u8).unwrap()
}

/// Sweeps schedule-mode queues once a minute until `shutdown` fires.
pub async fn run(manager: Arc<QueueManager>, shutdown: CancellationToken) {
    info!("scheduler started");
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        manager.window_sweep(local_now()).await;
    }
    info!("scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_now_is_a_valid_time_of_day() {
        // Smoke test: construction must never panic, whatever the clock says.
        let now = local_now();
        assert!(now.seconds_of_day() < 24 * 3600);
    }
}
