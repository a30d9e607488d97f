//! Monitoring Module
//!
//! Cache statistics, periodic reports with alerts, and backing store health.

mod health;
mod service;
mod stats;

pub use health::{HealthCheckService, HealthReport, DEFAULT_HEALTH_THRESHOLD};
pub use service::{
    alerts_for, Alert, MonitoringReport, MonitoringService, HIGH_ERROR_RATE_THRESHOLD,
    LOW_HIT_RATIO_THRESHOLD, MIN_LOOKUPS_FOR_HIT_RATIO,
};
pub use stats::{CacheMetrics, CacheOperation, CacheStatistics, StatisticsSnapshot};
