//! Health Check Service
//!
//! Liveness probe of the backing store: a ping that must answer within a
//! latency threshold.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::KeyValueStore;

/// Slowest ping still considered healthy.
pub const DEFAULT_HEALTH_THRESHOLD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

// == Health Check Service ==
#[derive(Debug, Clone)]
pub struct HealthCheckService {
    backend: Arc<dyn KeyValueStore>,
    threshold: Duration,
}

impl HealthCheckService {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self::with_threshold(backend, DEFAULT_HEALTH_THRESHOLD)
    }

    pub fn with_threshold(backend: Arc<dyn KeyValueStore>, threshold: Duration) -> Self {
        Self { backend, threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Pings the backing store. A ping slower than the threshold is
    /// abandoned and reported unhealthy.
    pub async fn check(&self) -> HealthReport {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.threshold, self.backend.ping()).await;
        let latency = started.elapsed();

        let error = match outcome {
            Ok(Ok(())) if latency <= self.threshold => None,
            Ok(Ok(())) => Some(format!(
                "ping took {} ms, threshold is {} ms",
                latency.as_millis(),
                self.threshold.as_millis()
            )),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "ping did not answer within {} ms",
                self.threshold.as_millis()
            )),
        };

        HealthReport {
            healthy: error.is_none(),
            latency_ms: latency.as_millis() as u64,
            error,
            checked_at: Utc::now(),
        }
    }

    pub async fn is_healthy(&self) -> bool {
        self.check().await.healthy
    }
}
