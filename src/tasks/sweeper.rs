//! Expiry Sweeper Task
//!
//! Background task that periodically removes expired entries from the
//! in-memory backing store. Reads already skip expired entries; the sweep
//! only reclaims their memory. Redis expires keys on its own.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::InMemoryStore;

/// Spawns a task that sweeps `store` every `interval` until `cancel` fires.
///
/// # Example
/// ```ignore
/// let store = Arc::new(InMemoryStore::new());
/// let cancel = CancellationToken::new();
/// let handle = spawn_expiry_sweeper(store.clone(), Duration::from_secs(1), cancel.clone());
/// // Later, during shutdown:
/// cancel.cancel();
/// handle.await?;
/// ```
pub fn spawn_expiry_sweeper(
    store: Arc<InMemoryStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting expiry sweeper");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let removed = store.cleanup_expired().await;
            if removed > 0 {
                info!(removed, "Expiry sweep removed entries");
            } else {
                debug!("Expiry sweep found nothing to remove");
            }
        }

        info!("Expiry sweeper stopped");
    })
}
