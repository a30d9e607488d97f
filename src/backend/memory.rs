//! In-Memory Store Module
//!
//! Process-local backing store with TTL expiration. Serves single-node
//! deployments and lets tests inject outages and latency.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use super::{current_timestamp_ms, glob_match, CacheEntry, KeyValueStore, ScanPage};
use crate::error::{CacheError, Result};

// == In-Memory Store ==
/// Ordered map of entries. Ordering gives scans a stable cursor: the last key
/// returned.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, CacheEntry>>,
    /// Every command fails while set
    outage: AtomicBool,
    /// Only batch commands fail while set
    batch_outage: AtomicBool,
    /// Added to every command, in milliseconds
    latency_ms: AtomicU64,
    commands: DashMap<&'static str, u64>,
}

impl InMemoryStore {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Fault Injection ==
    /// Makes every command fail with a backend error until cleared.
    pub fn simulate_outage(&self, enabled: bool) {
        self.outage.store(enabled, Ordering::SeqCst);
    }

    /// Makes `delete_many`, `get_many` and `set_many` fail until cleared.
    pub fn simulate_batch_outage(&self, enabled: bool) {
        self.batch_outage.store(enabled, Ordering::SeqCst);
    }

    /// Delays every command by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// How many times a command ran, successful or not.
    pub fn command_count(&self, command: &str) -> u64 {
        self.commands.get(command).map(|count| *count).unwrap_or(0)
    }

    /// Stores raw bytes, bypassing any codec. Lets tests plant corrupt entries.
    pub async fn insert_raw(&self, key: &str, value: &[u8], ttl: Duration) {
        self.entries
            .write()
            .await
            .insert(key.to_string(), CacheEntry::new(value.to_vec(), ttl));
    }

    /// Remaining TTL of a live key.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| Duration::from_millis(entry.ttl_remaining_ms()))
    }

    // == Cleanup Expired ==
    /// Removes all expired entries. Returns the number removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = current_timestamp_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }

    /// Number of stored entries, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn enter(&self, command: &'static str, batch: bool) -> Result<()> {
        *self.commands.entry(command).or_insert(0) += 1;

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.outage.load(Ordering::SeqCst)
            || (batch && self.batch_outage.load(Ordering::SeqCst))
        {
            return Err(CacheError::Backend(format!(
                "simulated outage during {}",
                command
            )));
        }
        Ok(())
    }
}

fn live<'a>(entries: &'a BTreeMap<String, CacheEntry>, key: &str) -> Option<&'a CacheEntry> {
    entries.get(key).filter(|entry| !entry.is_expired())
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        self.enter("set_if_absent", false).await?;
        let mut entries = self.entries.write().await;
        if live(&entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), CacheEntry::new(value.to_vec(), ttl));
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.enter("get", false).await?;
        let entries = self.entries.read().await;
        Ok(live(&entries, key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.enter("set", false).await?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), CacheEntry::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.enter("delete", false).await?;
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|entry| !entry.is_expired()))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        self.enter("delete_many", true).await?;
        let mut entries = self.entries.write().await;
        let removed = keys
            .iter()
            .filter_map(|key| entries.remove(key))
            .filter(|entry| !entry.is_expired())
            .count();
        Ok(removed as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.enter("exists", false).await?;
        Ok(live(&*self.entries.read().await, key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.enter("expire", false).await?;
        let mut entries = self.entries.write().await;
        let slid = match live(&entries, key) {
            Some(entry) => entry.with_ttl(ttl),
            None => return Ok(false),
        };
        entries.insert(key.to_string(), slid);
        Ok(true)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.enter("get_many", true).await?;
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .map(|key| live(&entries, key).map(|entry| entry.value.clone()))
            .collect())
    }

    async fn set_many(&self, items: &[(String, Vec<u8>)], ttl: Duration) -> Result<()> {
        self.enter("set_many", true).await?;
        let mut entries = self.entries.write().await;
        for (key, value) in items {
            entries.insert(key.clone(), CacheEntry::new(value.clone(), ttl));
        }
        Ok(())
    }

    async fn scan(&self, cursor: Option<&str>, pattern: &str, count: usize) -> Result<ScanPage> {
        self.enter("scan", false).await?;
        let count = count.max(1);
        let now = current_timestamp_ms();
        let entries = self.entries.read().await;

        let start = match cursor {
            Some(last) => Bound::Excluded(last.to_string()),
            None => Bound::Unbounded,
        };
        let keys: Vec<String> = entries
            .range((start, Bound::Unbounded))
            .filter(|(key, entry)| !entry.is_expired_at(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .take(count)
            .collect();

        let cursor = if keys.len() == count {
            keys.last().cloned()
        } else {
            None
        };
        Ok(ScanPage { cursor, keys })
    }

    async fn ping(&self) -> Result<()> {
        self.enter("ping", false).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        self.enter("compare_and_delete", false).await?;
        let mut entries = self.entries.write().await;
        match live(&entries, key) {
            Some(entry) if entry.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn flush(&self) -> Result<()> {
        self.enter("flush", false).await?;
        self.entries.write().await.clear();
        Ok(())
    }

    async fn entry_count(&self) -> Result<u64> {
        self.enter("entry_count", false).await?;
        let now = current_timestamp_ms();
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .count() as u64)
    }
}
