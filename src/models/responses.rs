//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::monitoring::{Alert, HealthReport, MonitoringReport};

/// Response body for key removal (DELETE /cache/keys/:key)
#[derive(Debug, Clone, Serialize)]
pub struct RemoveResponse {
    /// Success message
    pub message: String,
    /// The logical key that was removed
    pub key: String,
}

impl RemoveResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' removed", key),
            key,
        }
    }
}

/// Response body for pattern removal (DELETE /cache?pattern=...)
#[derive(Debug, Clone, Serialize)]
pub struct PatternRemoveResponse {
    pub pattern: String,
    /// Number of keys deleted
    pub removed: u64,
}

impl PatternRemoveResponse {
    pub fn new(pattern: impl Into<String>, removed: u64) -> Self {
        Self {
            pattern: pattern.into(),
            removed,
        }
    }
}

/// Response body for flush and statistics reset
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of backing store failures
    pub errors: u64,
    /// Hit ratio (hits / (hits + misses))
    pub hit_ratio: f64,
    /// Errors per operation
    pub error_rate: f64,
    /// Calls per operation name
    pub operations: std::collections::BTreeMap<String, u64>,
    /// Live keys in the backing store, when countable
    pub entry_count: Option<u64>,
    pub alerts: Vec<Alert>,
    /// Start of the counting window, ISO 8601
    pub last_reset: String,
}

impl From<MonitoringReport> for StatsResponse {
    fn from(report: MonitoringReport) -> Self {
        let statistics = report.statistics;
        Self {
            hits: statistics.hits,
            misses: statistics.misses,
            errors: statistics.errors,
            hit_ratio: report.hit_ratio,
            error_rate: report.error_rate,
            operations: statistics
                .operations
                .iter()
                .map(|(op, count)| (op.to_string(), *count))
                .collect(),
            entry_count: report.entry_count,
            alerts: report.alerts,
            last_reset: statistics.last_reset.to_rfc3339(),
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "unhealthy"
    pub status: String,
    /// Backing store ping latency
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time of the probe in ISO 8601 format
    pub timestamp: String,
}

impl From<HealthReport> for HealthResponse {
    fn from(report: HealthReport) -> Self {
        Self {
            status: if report.healthy { "healthy" } else { "unhealthy" }.to_string(),
            latency_ms: report.latency_ms,
            error: report.error,
            timestamp: report.checked_at.to_rfc3339(),
        }
    }
}
