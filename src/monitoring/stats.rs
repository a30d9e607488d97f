//! Cache Statistics Module
//!
//! Tracks hits, misses, errors and per-operation counts. Counters are atomic
//! so one instance can be shared by every request handler and the monitoring
//! loop; they live in memory only and start from zero on every boot.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

// == Cache Operation ==
/// Operations tallied by the statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOperation {
    Get,
    Set,
    GetOrAdd,
    Remove,
    RemoveByPattern,
    Exists,
    Refresh,
    GetMany,
    SetMany,
    Clear,
}

const OPERATION_COUNT: usize = 10;

impl CacheOperation {
    pub const ALL: [CacheOperation; OPERATION_COUNT] = [
        CacheOperation::Get,
        CacheOperation::Set,
        CacheOperation::GetOrAdd,
        CacheOperation::Remove,
        CacheOperation::RemoveByPattern,
        CacheOperation::Exists,
        CacheOperation::Refresh,
        CacheOperation::GetMany,
        CacheOperation::SetMany,
        CacheOperation::Clear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOperation::Get => "get",
            CacheOperation::Set => "set",
            CacheOperation::GetOrAdd => "get_or_add",
            CacheOperation::Remove => "remove",
            CacheOperation::RemoveByPattern => "remove_by_pattern",
            CacheOperation::Exists => "exists",
            CacheOperation::Refresh => "refresh",
            CacheOperation::GetMany => "get_many",
            CacheOperation::SetMany => "set_many",
            CacheOperation::Clear => "clear",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for CacheOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Metrics Sink ==
/// Where the cache store reports what happened. Injected, so tests can give
/// each store a fresh instance.
pub trait CacheMetrics: Send + Sync + fmt::Debug {
    fn record_hit(&self);
    fn record_miss(&self);
    fn record_error(&self);
    fn record_operation(&self, operation: CacheOperation);
    fn snapshot(&self) -> StatisticsSnapshot;
    fn reset(&self);
}

// == Snapshot ==
/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub operations: BTreeMap<CacheOperation, u64>,
    pub last_reset: DateTime<Utc>,
}

impl StatisticsSnapshot {
    /// Lookups that resolved to a hit or a miss.
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn total_operations(&self) -> u64 {
        self.operations.values().sum()
    }

    /// hits / (hits + misses), or 0.0 before any lookup.
    pub fn hit_ratio(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }

    /// errors / operations, or 0.0 before any operation.
    pub fn error_rate(&self) -> f64 {
        match self.total_operations() {
            0 => 0.0,
            total => self.errors as f64 / total as f64,
        }
    }
}

// == Cache Statistics ==
#[derive(Debug)]
pub struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    operations: [AtomicU64; OPERATION_COUNT],
    /// Unix milliseconds
    last_reset: AtomicI64,
}

impl CacheStatistics {
    /// Creates statistics with all counters at zero.
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            operations: std::array::from_fn(|_| AtomicU64::new(0)),
            last_reset: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    pub fn last_reset(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_reset.load(Ordering::Relaxed))
            .single()
            .unwrap_or_else(Utc::now)
    }
}

impl Default for CacheStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheMetrics for CacheStatistics {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_operation(&self, operation: CacheOperation) {
        self.operations[operation.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            operations: CacheOperation::ALL
                .iter()
                .map(|op| (*op, self.operations[op.index()].load(Ordering::Relaxed)))
                .filter(|(_, count)| *count > 0)
                .collect(),
            last_reset: self.last_reset(),
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        for counter in &self.operations {
            counter.store(0, Ordering::Relaxed);
        }
        self.last_reset
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let snapshot = CacheStatistics::new().snapshot();
        assert_eq!(snapshot.hits, 0);
        assert_eq!(snapshot.misses, 0);
        assert_eq!(snapshot.errors, 0);
        assert!(snapshot.operations.is_empty());
    }

    #[test]
    fn test_hit_ratio_no_requests() {
        assert_eq!(CacheStatistics::new().snapshot().hit_ratio(), 0.0);
    }

    #[test]
    fn test_hit_ratio_mixed() {
        let stats = CacheStatistics::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.snapshot().hit_ratio(), 0.75);
    }

    #[test]
    fn test_operation_tally_and_error_rate() {
        let stats = CacheStatistics::new();
        for _ in 0..3 {
            stats.record_operation(CacheOperation::Get);
        }
        stats.record_operation(CacheOperation::Set);
        stats.record_error();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.operations.get(&CacheOperation::Get), Some(&3));
        assert_eq!(snapshot.operations.get(&CacheOperation::Set), Some(&1));
        assert_eq!(snapshot.operations.get(&CacheOperation::Remove), None);
        assert_eq!(snapshot.total_operations(), 4);
        assert_eq!(snapshot.error_rate(), 0.25);
    }

    #[test]
    fn test_reset_zeroes_and_stamps() {
        let stats = CacheStatistics::new();
        let before = stats.last_reset();
        stats.record_hit();
        stats.record_error();
        stats.record_operation(CacheOperation::GetOrAdd);

        std::thread::sleep(std::time::Duration::from_millis(5));
        stats.reset();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.hits, 0);
        assert_eq!(snapshot.errors, 0);
        assert_eq!(snapshot.total_operations(), 0);
        assert!(snapshot.last_reset > before);
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = std::sync::Arc::new(CacheStatistics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_hit();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.snapshot().hits, 8000);
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(CacheOperation::GetOrAdd.to_string(), "get_or_add");
        let json = serde_json::to_string(&CacheOperation::RemoveByPattern).unwrap();
        assert_eq!(json, r#""remove_by_pattern""#);
    }
}
