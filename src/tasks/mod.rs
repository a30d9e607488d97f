//! Background Tasks Module
//!
//! Long-running loops spawned at startup. Each one stops promptly when its
//! cancellation token fires.
//!
//! # Tasks
//! - Statistics: logs reports and alerts, resets counters on schedule
//! - Health: probes the backing store
//! - Expiry sweeper: removes expired entries from the in-memory store

mod health;
mod statistics;
mod sweeper;

use std::time::Duration;

pub use health::spawn_health_check_task;
pub use statistics::spawn_statistics_task;
pub use sweeper::spawn_expiry_sweeper;

/// Longest wait, as a multiple of the base interval, after repeated failures.
pub const MAX_BACKOFF_FACTOR: u32 = 5;

/// Wait before the next run: `interval × (1 + failures)`, capped at
/// [`MAX_BACKOFF_FACTOR`] × `interval`.
pub fn backoff_delay(interval: Duration, consecutive_failures: u32) -> Duration {
    let factor = consecutive_failures
        .saturating_add(1)
        .min(MAX_BACKOFF_FACTOR);
    interval.saturating_mul(factor)
}
