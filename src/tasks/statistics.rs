//! Statistics Task
//!
//! Periodically logs the monitoring report and lets the monitoring service
//! reset counters once the reset horizon has passed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::backoff_delay;
use crate::monitoring::MonitoringService;

/// Spawns the statistics loop.
///
/// A failed cycle stretches the next wait (see [`backoff_delay`]); the loop
/// keeps going until `cancel` fires.
pub fn spawn_statistics_task(
    monitor: Arc<MonitoringService>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Starting statistics task");
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff_delay(interval, failures)) => {}
            }

            match monitor.run_cycle().await {
                Ok(_) => failures = 0,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(error = %e, failures, "Statistics cycle failed");
                }
            }
        }

        info!("Statistics task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryStore;
    use crate::config::MonitoringOptions;
    use crate::monitoring::{CacheMetrics, CacheStatistics};

    #[tokio::test(start_paused = true)]
    async fn test_statistics_task_resets_on_schedule() {
        let stats = Arc::new(CacheStatistics::new());
        stats.record_hit();
        let options = MonitoringOptions {
            statistics_reset_horizon: Duration::ZERO,
            ..MonitoringOptions::default()
        };
        let monitor = Arc::new(MonitoringService::new(
            Arc::new(InMemoryStore::new()),
            stats.clone(),
            &options,
        ));
        let cancel = CancellationToken::new();

        let handle = spawn_statistics_task(monitor, Duration::from_millis(10), cancel.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.snapshot().hits, 0);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_statistics_task_survives_backend_failure() {
        let backend = Arc::new(InMemoryStore::new());
        backend.simulate_outage(true);
        let monitor = Arc::new(MonitoringService::new(
            backend.clone(),
            Arc::new(CacheStatistics::new()),
            &MonitoringOptions::default(),
        ));
        let cancel = CancellationToken::new();

        let handle = spawn_statistics_task(monitor, Duration::from_millis(5), cancel.clone());
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!handle.is_finished());
        // Backed-off cycles at 5, 15, 30 and 50 ms.
        assert_eq!(backend.command_count("entry_count"), 4);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_statistics_task_stops_on_cancel() {
        let monitor = Arc::new(MonitoringService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(CacheStatistics::new()),
            &MonitoringOptions::default(),
        ));
        let cancel = CancellationToken::new();

        let handle = spawn_statistics_task(monitor, Duration::from_secs(3600), cancel.clone());
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should stop promptly")
            .unwrap();
    }
}
