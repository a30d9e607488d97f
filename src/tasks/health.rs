//! Health Check Task
//!
//! Periodically probes the backing store and logs transitions between
//! healthy and unhealthy.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff_delay;
use crate::monitoring::HealthCheckService;

/// Spawns the health check loop. Consecutive failures stretch the wait
/// between probes; the loop runs until `cancel` fires.
pub fn spawn_health_check_task(
    health: Arc<HealthCheckService>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Starting health check task");
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff_delay(interval, failures)) => {}
            }

            let report = health.check().await;
            if report.healthy {
                if failures > 0 {
                    info!(latency_ms = report.latency_ms, "Backing store recovered");
                } else {
                    debug!(latency_ms = report.latency_ms, "Backing store healthy");
                }
                failures = 0;
            } else {
                failures = failures.saturating_add(1);
                warn!(
                    latency_ms = report.latency_ms,
                    error = report.error.as_deref().unwrap_or("unknown"),
                    failures,
                    "Backing store unhealthy"
                );
            }
        }

        info!("Health check task stopped");
    })
}
