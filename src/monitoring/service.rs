//! Monitoring Service
//!
//! Turns the raw counters into periodic reports with alerts, and owns the
//! statistics reset schedule.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::stats::{CacheMetrics, StatisticsSnapshot};
use crate::backend::KeyValueStore;
use crate::config::MonitoringOptions;
use crate::error::{CacheError, Result};

/// Hit ratio below which `LowHitRatio` fires.
pub const LOW_HIT_RATIO_THRESHOLD: f64 = 0.5;

/// Lookups needed before the hit ratio is meaningful.
pub const MIN_LOOKUPS_FOR_HIT_RATIO: u64 = 100;

/// Error rate above which `HighErrorRate` fires.
pub const HIGH_ERROR_RATE_THRESHOLD: f64 = 0.05;

// == Alerts ==
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    LowHitRatio { ratio: f64, lookups: u64 },
    HighErrorRate { rate: f64, errors: u64 },
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Alert::LowHitRatio { ratio, lookups } => write!(
                f,
                "hit ratio {:.1}% over {} lookups",
                ratio * 100.0,
                lookups
            ),
            Alert::HighErrorRate { rate, errors } => {
                write!(f, "error rate {:.1}% ({} errors)", rate * 100.0, errors)
            }
        }
    }
}

/// Alerts raised by a snapshot.
pub fn alerts_for(snapshot: &StatisticsSnapshot) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let ratio = snapshot.hit_ratio();
    if snapshot.lookups() >= MIN_LOOKUPS_FOR_HIT_RATIO && ratio < LOW_HIT_RATIO_THRESHOLD {
        alerts.push(Alert::LowHitRatio {
            ratio,
            lookups: snapshot.lookups(),
        });
    }
    let rate = snapshot.error_rate();
    if rate > HIGH_ERROR_RATE_THRESHOLD {
        alerts.push(Alert::HighErrorRate {
            rate,
            errors: snapshot.errors,
        });
    }
    alerts
}

// == Report ==
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringReport {
    pub statistics: StatisticsSnapshot,
    pub hit_ratio: f64,
    pub error_rate: f64,
    /// Live keys in the backing store; absent when it could not be counted
    pub entry_count: Option<u64>,
    pub alerts: Vec<Alert>,
    pub generated_at: DateTime<Utc>,
}

// == Monitoring Service ==
#[derive(Debug, Clone)]
pub struct MonitoringService {
    backend: Arc<dyn KeyValueStore>,
    metrics: Arc<dyn CacheMetrics>,
    reset_horizon: Duration,
}

impl MonitoringService {
    pub fn new(
        backend: Arc<dyn KeyValueStore>,
        metrics: Arc<dyn CacheMetrics>,
        options: &MonitoringOptions,
    ) -> Self {
        Self {
            backend,
            metrics,
            reset_horizon: options.statistics_reset_horizon,
        }
    }

    pub fn metrics(&self) -> &Arc<dyn CacheMetrics> {
        &self.metrics
    }

    /// Current statistics with alerts. Never fails; a backing store that
    /// cannot be counted leaves `entry_count` empty.
    pub async fn report(&self) -> MonitoringReport {
        self.collect().await.0
    }

    async fn collect(&self) -> (MonitoringReport, Option<CacheError>) {
        let statistics = self.metrics.snapshot();
        let (entry_count, error) = match self.backend.entry_count().await {
            Ok(count) => (Some(count), None),
            Err(e) => (None, Some(e)),
        };
        let report = MonitoringReport {
            hit_ratio: statistics.hit_ratio(),
            error_rate: statistics.error_rate(),
            alerts: alerts_for(&statistics),
            statistics,
            entry_count,
            generated_at: Utc::now(),
        };
        (report, error)
    }

    // == Run Cycle ==
    /// One pass of the statistics loop: log the report and its alerts, then
    /// reset the counters if the reset horizon has passed.
    ///
    /// Fails when the backing store could not be counted, after logging
    /// everything else.
    pub async fn run_cycle(&self) -> Result<MonitoringReport> {
        let (report, error) = self.collect().await;

        info!(
            hits = report.statistics.hits,
            misses = report.statistics.misses,
            errors = report.statistics.errors,
            operations = report.statistics.total_operations(),
            hit_ratio = report.hit_ratio,
            entry_count = ?report.entry_count,
            "Cache statistics"
        );
        for alert in &report.alerts {
            warn!(alert = %alert, "Cache alert");
        }

        if self.reset_due(report.statistics.last_reset) {
            self.reset_statistics();
        }

        match error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    pub fn reset_statistics(&self) {
        self.metrics.reset();
        info!("Cache statistics reset");
    }

    fn reset_due(&self, last_reset: DateTime<Utc>) -> bool {
        let elapsed = (Utc::now() - last_reset).to_std().unwrap_or_default();
        elapsed >= self.reset_horizon
    }
}
