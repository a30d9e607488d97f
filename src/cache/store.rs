//! Cache Store Module
//!
//! Typed reads and writes over the backing store, batch and pattern
//! operations, and the stampede-safe `get_or_add`.
//!
//! The cache is an optimization: on every read or compute path a backing
//! store failure is logged and the caller gets a miss or a freshly computed
//! value, never the error. Only invalid keys are reported, immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::KeyValueStore;
use crate::cache::codec::{Codec, Decoded};
use crate::cache::keys::KeyService;
use crate::cache::locks::{DistributedLock, LocalLockMap};
use crate::config::CacheOptions;
use crate::error::{CacheError, Result};
use crate::monitoring::{CacheMetrics, CacheOperation, CacheStatistics};

/// Keys requested per scan page and deleted per batch by pattern removal.
pub const PATTERN_BATCH_SIZE: usize = 1000;

/// Prefix of distributed lock keys: `lock:{normalized key}`.
pub const LOCK_KEY_PREFIX: &str = "lock:";

// == Expiration ==
/// Named expiration tiers from the options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    Short,
    Default,
    Long,
    Custom(Duration),
}

// == Cache Store ==
pub struct CacheStore {
    backend: Arc<dyn KeyValueStore>,
    keys: KeyService,
    options: CacheOptions,
    metrics: Arc<dyn CacheMetrics>,
    local_locks: LocalLockMap,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend)
            .field("options", &self.options)
            .field("local_locks", &self.local_locks.len())
            .finish()
    }
}

impl CacheStore {
    // == Constructor ==
    /// Creates a store with its own fresh statistics.
    pub fn new(backend: Arc<dyn KeyValueStore>, options: CacheOptions) -> Self {
        Self::with_metrics(backend, options, Arc::new(CacheStatistics::new()))
    }

    /// Creates a store reporting into `metrics`.
    pub fn with_metrics(
        backend: Arc<dyn KeyValueStore>,
        options: CacheOptions,
        metrics: Arc<dyn CacheMetrics>,
    ) -> Self {
        Self {
            backend,
            keys: KeyService::new(&options),
            options,
            metrics,
            local_locks: LocalLockMap::new(),
        }
    }

    pub fn keys(&self) -> &KeyService {
        &self.keys
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn metrics(&self) -> &Arc<dyn CacheMetrics> {
        &self.metrics
    }

    pub fn backend(&self) -> &Arc<dyn KeyValueStore> {
        &self.backend
    }

    /// Number of per-key local mutexes currently alive.
    pub fn local_lock_count(&self) -> usize {
        self.local_locks.len()
    }

    /// Resolves a named tier to a duration.
    pub fn expiration(&self, expiration: Expiration) -> Duration {
        match expiration {
            Expiration::Short => self.options.short_expiration,
            Expiration::Default => self.options.default_expiration,
            Expiration::Long => self.options.long_expiration,
            Expiration::Custom(ttl) => ttl,
        }
    }

    fn ttl_or_default(&self, ttl: Option<Duration>) -> Duration {
        ttl.unwrap_or(self.options.default_expiration)
    }

    // == Get ==
    /// Reads and decodes `key`.
    ///
    /// An entry that no longer decodes as `T` is deleted and reported as a
    /// miss. A backing store failure is also a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let key = self.keys.normalize(key)?;
        self.metrics.record_operation(CacheOperation::Get);

        match self.read::<T>(&key).await {
            Ok(value) => {
                self.record_lookup(&key, value.is_some());
                Ok(value)
            }
            Err(e) => {
                self.record_failure(&key, CacheOperation::Get, &e);
                Ok(None)
            }
        }
    }

    // == Set ==
    /// Encodes and writes `value`, expiring after `ttl` or the default.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let key = self.keys.normalize(key)?;
        self.metrics.record_operation(CacheOperation::Set);

        let result = self.write(&key, value, self.ttl_or_default(ttl)).await;
        if let Err(e) = &result {
            self.record_failure(&key, CacheOperation::Set, e);
        }
        result
    }

    /// [`set`](Self::set) with a named expiration tier.
    pub async fn set_with_expiration<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiration: Expiration,
    ) -> Result<()> {
        self.set(key, value, Some(self.expiration(expiration))).await
    }

    // == Get Or Add ==
    /// Returns the cached value for `key`, or computes, caches and returns it.
    ///
    /// Concurrent misses for the same key are coordinated so that usually only
    /// one of them runs `factory`; the others wait and read its result. Under
    /// contention, timeouts or backing store failures the factory may still
    /// run more than once, so it must be safe to call repeatedly.
    ///
    /// Factory errors are returned unchanged and nothing is cached. A value
    /// that serializes to `null` is returned but not cached.
    pub async fn get_or_add<T, F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        ttl: Option<Duration>,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<CacheError>,
    {
        self.get_or_add_cancellable(key, factory, ttl, &CancellationToken::new())
            .await
    }

    /// [`get_or_add`](Self::get_or_add) that gives up with
    /// [`CacheError::Cancelled`] when `cancel` fires. Any lock held at that
    /// point is released.
    pub async fn get_or_add_cancellable<T, F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        ttl: Option<Duration>,
        cancel: &CancellationToken,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<CacheError>,
    {
        let key = self.keys.normalize(key)?;
        self.metrics.record_operation(CacheOperation::GetOrAdd);
        let ttl = self.ttl_or_default(ttl);

        match self.read::<T>(&key).await {
            Ok(Some(value)) => {
                self.record_lookup(&key, true);
                return Ok(value);
            }
            Ok(None) => self.record_lookup(&key, false),
            Err(e) => {
                self.record_failure(&key, CacheOperation::GetOrAdd, &e);
                return factory().await;
            }
        }

        if self.options.distributed_locking {
            self.compute_with_distributed_lock(&key, factory, ttl, cancel)
                .await
        } else {
            self.compute_with_local_lock(&key, factory, ttl, cancel)
                .await
        }
    }

    async fn compute_with_distributed_lock<T, F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<CacheError>,
    {
        let lock_key = format!("{}{}", LOCK_KEY_PREFIX, key);
        let acquired =
            DistributedLock::try_acquire(self.backend.clone(), &lock_key, self.options.lock_timeout)
                .await;

        match acquired {
            Ok(Some(lock)) => {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(E::from(CacheError::Cancelled)),
                    outcome = self.double_check_then_compute(key, factory, ttl) => outcome,
                };
                lock.release().await;
                outcome
            }
            Ok(None) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(E::from(CacheError::Cancelled)),
                    _ = tokio::time::sleep(self.options.retry_delay) => {}
                }
                match self.read::<T>(key).await {
                    Ok(Some(value)) => return Ok(value),
                    Ok(None) => {
                        debug!(key = %key, "Lock still held after retry delay, computing without it");
                    }
                    Err(e) => {
                        self.record_failure(key, CacheOperation::GetOrAdd, &e);
                        return factory().await;
                    }
                }
                self.compute_and_store(key, factory, ttl).await
            }
            Err(e) => {
                self.record_failure(&lock_key, CacheOperation::GetOrAdd, &e);
                factory().await
            }
        }
    }

    async fn compute_with_local_lock<T, F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<CacheError>,
    {
        let guard = self
            .local_locks
            .acquire(key, self.options.lock_timeout, cancel)
            .await?;
        if guard.is_none() {
            debug!(key = %key, "Timed out waiting for local lock, computing without it");
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(E::from(CacheError::Cancelled)),
            outcome = self.double_check_then_compute(key, factory, ttl) => outcome,
        };
        drop(guard);
        outcome
    }

    /// Another caller may have filled the entry while we waited for the lock.
    async fn double_check_then_compute<T, F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        ttl: Duration,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        match self.read::<T>(key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => self.record_failure(key, CacheOperation::GetOrAdd, &e),
        }
        self.compute_and_store(key, factory, ttl).await
    }

    async fn compute_and_store<T, F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        ttl: Duration,
    ) -> std::result::Result<T, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let value = factory().await?;
        if Codec::is_null(&value) {
            return Ok(value);
        }
        if let Err(e) = self.write(key, &value, ttl).await {
            self.record_failure(key, CacheOperation::Set, &e);
        }
        Ok(value)
    }

    // == Remove ==
    /// Deletes `key`. Removing a missing key is a no-op; backing store
    /// failures are logged.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let key = self.keys.normalize(key)?;
        self.metrics.record_operation(CacheOperation::Remove);

        match self.backend.delete(&key).await {
            Ok(existed) => {
                if self.options.detailed_logging {
                    debug!(key = %key, existed, "Cache remove");
                }
            }
            Err(e) => self.record_failure(&key, CacheOperation::Remove, &e),
        }
        Ok(())
    }

    /// Deletes several keys in one batch, falling back to one-by-one removal
    /// if the batch fails.
    pub async fn remove_many<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        let keys = self.normalize_all(keys)?;
        self.metrics.record_operation(CacheOperation::Remove);
        self.delete_batch(&keys).await;
        Ok(())
    }

    // == Remove By Pattern ==
    /// Deletes every key matching the glob `pattern` (`product:*`), scanning
    /// and deleting in batches of [`PATTERN_BATCH_SIZE`].
    ///
    /// Not atomic: keys written during the sweep may survive it, and a failed
    /// scan stops early. Returns the number of keys deleted.
    pub async fn remove_by_pattern(&self, pattern: &str) -> Result<u64> {
        let pattern = self.keys.normalize_pattern(pattern)?;
        self.metrics.record_operation(CacheOperation::RemoveByPattern);

        let mut cursor: Option<String> = None;
        let mut removed = 0u64;
        let mut batches = 0u32;
        loop {
            let page = match self
                .backend
                .scan(cursor.as_deref(), &pattern, PATTERN_BATCH_SIZE)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    self.record_failure(&pattern, CacheOperation::RemoveByPattern, &e);
                    break;
                }
            };
            if !page.keys.is_empty() {
                batches += 1;
                removed += self.delete_batch(&page.keys).await;
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(pattern = %pattern, removed, batches, "Removed cache keys by pattern");
        Ok(removed)
    }

    async fn delete_batch(&self, keys: &[String]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        match self.backend.delete_many(keys).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(count = keys.len(), error = %e, "Batch delete failed, deleting keys one by one");
                self.metrics.record_error();
                let mut removed = 0;
                for key in keys {
                    match self.backend.delete(key).await {
                        Ok(true) => removed += 1,
                        Ok(false) => {}
                        Err(e) => self.record_failure(key, CacheOperation::Remove, &e),
                    }
                }
                removed
            }
        }
    }

    // == Exists ==
    /// Whether `key` holds a live entry. `false` when the store is unreachable.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let key = self.keys.normalize(key)?;
        self.metrics.record_operation(CacheOperation::Exists);

        match self.backend.exists(&key).await {
            Ok(exists) => Ok(exists),
            Err(e) => {
                self.record_failure(&key, CacheOperation::Exists, &e);
                Ok(false)
            }
        }
    }

    // == Refresh ==
    /// Restarts the expiration of `key` without reading its value. Returns
    /// whether the key existed.
    pub async fn refresh(&self, key: &str, ttl: Option<Duration>) -> Result<bool> {
        let key = self.keys.normalize(key)?;
        self.metrics.record_operation(CacheOperation::Refresh);

        match self.backend.expire(&key, self.ttl_or_default(ttl)).await {
            Ok(existed) => Ok(existed),
            Err(e) => {
                self.record_failure(&key, CacheOperation::Refresh, &e);
                Ok(false)
            }
        }
    }

    // == Get Many ==
    /// Reads several keys at once; results line up with `keys`. Falls back
    /// to individual reads if the batch read fails.
    pub async fn get_many<T: DeserializeOwned, S: AsRef<str>>(
        &self,
        keys: &[S],
    ) -> Result<Vec<Option<T>>> {
        let keys = self.normalize_all(keys)?;
        self.metrics.record_operation(CacheOperation::GetMany);
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let raw = match self.backend.get_many(&keys).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(count = keys.len(), error = %e, "Batch read failed, reading keys one by one");
                self.metrics.record_error();
                let mut values = Vec::with_capacity(keys.len());
                for key in &keys {
                    let value = match self.read::<T>(key).await {
                        Ok(value) => value,
                        Err(e) => {
                            self.record_failure(key, CacheOperation::Get, &e);
                            None
                        }
                    };
                    self.record_lookup(key, value.is_some());
                    values.push(value);
                }
                return Ok(values);
            }
        };

        let mut values = Vec::with_capacity(keys.len());
        for (key, bytes) in keys.iter().zip(raw) {
            let value = match bytes {
                Some(bytes) => self.decode_or_evict::<T>(key, &bytes).await,
                None => None,
            };
            self.record_lookup(key, value.is_some());
            values.push(value);
        }
        Ok(values)
    }

    // == Set Many ==
    /// Writes several entries with one expiration. Falls back to individual
    /// writes if the batch write fails; reports an error only if some of
    /// those fail too.
    pub async fn set_many<T: Serialize, S: AsRef<str>>(
        &self,
        entries: &[(S, T)],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let ttl = self.ttl_or_default(ttl);
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let key = self.keys.normalize(key.as_ref())?;
            if Codec::is_null(value) {
                continue;
            }
            encoded.push((key, self.options.codec.encode(value)?));
        }
        self.metrics.record_operation(CacheOperation::SetMany);
        if encoded.is_empty() {
            return Ok(());
        }

        let Err(e) = self.backend.set_many(&encoded, ttl).await else {
            return Ok(());
        };
        warn!(count = encoded.len(), error = %e, "Batch write failed, writing keys one by one");
        self.metrics.record_error();

        let mut failed = 0usize;
        for (key, bytes) in &encoded {
            if let Err(e) = self.backend.set(key, bytes, ttl).await {
                self.record_failure(key, CacheOperation::Set, &e);
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(CacheError::Backend(format!(
                "{} of {} cache writes failed",
                failed,
                encoded.len()
            )));
        }
        Ok(())
    }

    // == Clear All ==
    /// Flushes the entire backing database, including keys outside this
    /// store's prefix.
    pub async fn clear_all(&self) -> Result<()> {
        self.metrics.record_operation(CacheOperation::Clear);
        if let Err(e) = self.backend.flush().await {
            self.record_failure("*", CacheOperation::Clear, &e);
            return Err(e);
        }
        warn!("Cache database flushed");
        Ok(())
    }

    // == Internals ==
    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.backend.get(key).await? {
            Some(bytes) => Ok(self.decode_or_evict(key, &bytes).await),
            None => Ok(None),
        }
    }

    async fn decode_or_evict<T: DeserializeOwned>(&self, key: &str, bytes: &[u8]) -> Option<T> {
        match self.options.codec.decode::<T>(bytes) {
            Decoded::Value(value) => Some(value),
            Decoded::Corrupt(reason) => {
                warn!(key = %key, reason = %reason, "Evicting unreadable cache entry");
                if let Err(e) = self.backend.delete(key).await {
                    self.record_failure(key, CacheOperation::Remove, &e);
                }
                None
            }
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let bytes = self.options.codec.encode(value)?;
        self.backend.set(key, &bytes, ttl).await?;
        if self.options.detailed_logging {
            debug!(key = %key, bytes = bytes.len(), ttl_ms = ttl.as_millis() as u64, "Cache set");
        }
        Ok(())
    }

    fn normalize_all<S: AsRef<str>>(&self, keys: &[S]) -> Result<Vec<String>> {
        keys.iter()
            .map(|key| self.keys.normalize(key.as_ref()))
            .collect()
    }

    fn record_lookup(&self, key: &str, hit: bool) {
        if hit {
            self.metrics.record_hit();
        } else {
            self.metrics.record_miss();
        }
        if self.options.detailed_logging {
            debug!(key = %key, hit, "Cache lookup");
        }
    }

    fn record_failure(&self, key: &str, operation: CacheOperation, error: &CacheError) {
        self.metrics.record_error();
        warn!(key = %key, operation = %operation, error = %error, "Cache operation failed");
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryStore;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Product {
        id: u64,
        name: String,
    }

    fn product(id: u64) -> Product {
        Product {
            id,
            name: format!("product-{}", id),
        }
    }

    fn setup(options: CacheOptions) -> (Arc<InMemoryStore>, CacheStore) {
        let backend = Arc::new(InMemoryStore::new());
        let store = CacheStore::new(backend.clone(), options);
        (backend, store)
    }

    fn default_setup() -> (Arc<InMemoryStore>, CacheStore) {
        setup(CacheOptions::default())
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (backend, store) = default_setup();

        store.set("product:id:1", &product(1), None).await.unwrap();

        let value: Option<Product> = store.get("product:id:1").await.unwrap();
        assert_eq!(value, Some(product(1)));
        assert!(backend.get("cms:product:id:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_missing_is_none_and_counted() {
        let (_, store) = default_setup();

        let value: Option<Product> = store.get("product:id:404").await.unwrap();
        assert!(value.is_none());

        let snapshot = store.metrics().snapshot();
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.operations.get(&CacheOperation::Get), Some(&1));
    }

    #[tokio::test]
    async fn test_set_uses_default_expiration() {
        let (backend, store) = default_setup();
        store.set("product:id:1", &product(1), None).await.unwrap();

        let ttl = backend.ttl("cms:product:id:1").await.unwrap();
        assert!(ttl > Duration::from_secs(1790) && ttl <= Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_set_with_expiration_tiers() {
        let (backend, store) = default_setup();
        store
            .set_with_expiration("a", &1, Expiration::Short)
            .await
            .unwrap();
        store
            .set_with_expiration("b", &1, Expiration::Long)
            .await
            .unwrap();

        assert!(backend.ttl("cms:a").await.unwrap() <= Duration::from_secs(300));
        assert!(backend.ttl("cms:b").await.unwrap() > Duration::from_secs(7000));
    }

    #[tokio::test]
    async fn test_invalid_key_is_rejected() {
        let (_, store) = default_setup();

        assert!(matches!(
            store.get::<Product>("").await,
            Err(CacheError::InvalidKey(_))
        ));
        assert!(matches!(
            store.set("bad\nkey", &1, None).await,
            Err(CacheError::InvalidKey(_))
        ));
        assert!(matches!(store.remove("  ").await, Err(CacheError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_evicted() {
        let (backend, store) = default_setup();
        backend
            .insert_raw("cms:product:id:9", b"{definitely not json", Duration::from_secs(60))
            .await;

        let value: Option<Product> = store.get("product:id:9").await.unwrap();

        assert!(value.is_none());
        assert!(!backend.exists("cms:product:id:9").await.unwrap());
    }

    #[tokio::test]
    async fn test_backend_outage_reads_as_miss() {
        let (backend, store) = default_setup();
        backend.simulate_outage(true);

        let value: Option<Product> = store.get("product:id:1").await.unwrap();
        assert!(value.is_none());
        assert!(!store.exists("product:id:1").await.unwrap());
        assert!(store.remove("product:id:1").await.is_ok());
        assert!(matches!(
            store.set("product:id:1", &product(1), None).await,
            Err(CacheError::Backend(_))
        ));
        assert!(store.metrics().snapshot().errors >= 4);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (_, store) = default_setup();
        store.set("product:id:1", &product(1), None).await.unwrap();

        store.remove("product:id:1").await.unwrap();
        store.remove("product:id:1").await.unwrap();

        assert!(!store.exists("product:id:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_many_falls_back_to_single_deletes() {
        let (backend, store) = default_setup();
        store.set("a", &1, None).await.unwrap();
        store.set("b", &2, None).await.unwrap();
        backend.simulate_batch_outage(true);

        store.remove_many(&["a", "b", "c"]).await.unwrap();

        assert!(backend.is_empty().await);
        assert_eq!(backend.command_count("delete"), 3);
    }

    #[tokio::test]
    async fn test_remove_by_pattern_deletes_in_batches() {
        let (backend, store) = default_setup();
        for i in 0..2500 {
            backend
                .insert_raw(&format!("cms:product:id:{}", i), b"1", Duration::from_secs(60))
                .await;
        }
        backend
            .insert_raw("cms:page:id:1", b"1", Duration::from_secs(60))
            .await;

        let removed = store.remove_by_pattern("product:*").await.unwrap();

        assert_eq!(removed, 2500);
        assert_eq!(backend.command_count("delete_many"), 3);
        assert_eq!(backend.len().await, 1);
        assert!(store.exists("page:id:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_by_pattern_survives_scan_failure() {
        let (backend, store) = default_setup();
        store.set("product:id:1", &1, None).await.unwrap();
        backend.simulate_outage(true);

        assert_eq!(store.remove_by_pattern("product:*").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refresh_slides_expiration() {
        let (backend, store) = default_setup();
        store
            .set("page:id:1", &"home", Some(Duration::from_secs(5)))
            .await
            .unwrap();

        assert!(store
            .refresh("page:id:1", Some(Duration::from_secs(600)))
            .await
            .unwrap());
        assert!(backend.ttl("cms:page:id:1").await.unwrap() > Duration::from_secs(590));
        assert!(!store.refresh("page:id:2", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_many_and_set_many() {
        let (backend, store) = default_setup();
        store
            .set_many(&[("product:id:1", product(1)), ("product:id:2", product(2))], None)
            .await
            .unwrap();
        backend
            .insert_raw("cms:product:id:3", b"garbage", Duration::from_secs(60))
            .await;

        let values: Vec<Option<Product>> = store
            .get_many(&["product:id:1", "product:id:404", "product:id:2", "product:id:3"])
            .await
            .unwrap();

        assert_eq!(values, vec![Some(product(1)), None, Some(product(2)), None]);
        assert!(!backend.exists("cms:product:id:3").await.unwrap());

        let snapshot = store.metrics().snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 2);
    }

    #[tokio::test]
    async fn test_batch_outage_falls_back_per_key() {
        let (backend, store) = default_setup();
        backend.simulate_batch_outage(true);

        store
            .set_many(&[("a", 1), ("b", 2)], None)
            .await
            .unwrap();
        let values: Vec<Option<i32>> = store.get_many(&["a", "b"]).await.unwrap();

        assert_eq!(values, vec![Some(1), Some(2)]);
        assert_eq!(backend.command_count("set"), 2);
    }

    #[tokio::test]
    async fn test_get_or_add_caches_computed_value() {
        let (_, store) = default_setup();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Product = store
                .get_or_add(
                    "product:id:5",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, CacheError>(product(5))
                    },
                    None,
                )
                .await
                .unwrap();
            assert_eq!(value, product(5));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let snapshot = store.metrics().snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
    }

    #[tokio::test]
    async fn test_get_or_add_releases_lock() {
        let (backend, store) = default_setup();

        let _: u32 = store
            .get_or_add("counter", || async { Ok::<_, CacheError>(1) }, None)
            .await
            .unwrap();

        assert!(!backend.exists("lock:cms:counter").await.unwrap());
        assert_eq!(backend.command_count("compare_and_delete"), 1);
    }

    #[tokio::test]
    async fn test_get_or_add_factory_error_is_not_cached() {
        let (backend, store) = default_setup();

        let result: std::result::Result<u32, anyhow::Error> = store
            .get_or_add("counter", || async { Err(anyhow::anyhow!("db down")) }, None)
            .await;

        assert_eq!(result.unwrap_err().to_string(), "db down");
        assert!(!backend.exists("cms:counter").await.unwrap());
        assert!(!backend.exists("lock:cms:counter").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_or_add_does_not_cache_none() {
        let (backend, store) = default_setup();

        let value: Option<Product> = store
            .get_or_add("product:id:77", || async { Ok::<_, CacheError>(None) }, None)
            .await
            .unwrap();

        assert!(value.is_none());
        assert!(!backend.exists("cms:product:id:77").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_or_add_falls_back_to_factory_on_outage() {
        let (backend, store) = default_setup();
        backend.simulate_outage(true);

        let value: Product = store
            .get_or_add("product:id:1", || async { Ok::<_, CacheError>(product(1)) }, None)
            .await
            .unwrap();

        assert_eq!(value, product(1));
        assert_eq!(store.metrics().snapshot().errors, 1);
    }

    #[tokio::test]
    async fn test_get_or_add_waits_for_lock_holder() {
        let options = CacheOptions {
            retry_delay: Duration::from_millis(50),
            ..CacheOptions::default()
        };
        let (backend, store) = setup(options);
        // Another node holds the lock and fills the entry while we wait.
        backend
            .set("lock:cms:product:id:1", b"other-node", Duration::from_secs(30))
            .await
            .unwrap();
        let filler = {
            let backend = backend.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                backend
                    .set("cms:product:id:1", br#"{"id":1,"name":"from-other-node"}"#, Duration::from_secs(60))
                    .await
                    .unwrap();
            })
        };

        let value: Product = store
            .get_or_add(
                "product:id:1",
                || async { Ok::<_, CacheError>(product(1)) },
                None,
            )
            .await
            .unwrap();
        filler.await.unwrap();

        assert_eq!(value.name, "from-other-node");
        // The foreign lock is untouched.
        assert!(backend.exists("lock:cms:product:id:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_or_add_computes_after_retry_when_still_empty() {
        let options = CacheOptions {
            retry_delay: Duration::from_millis(10),
            ..CacheOptions::default()
        };
        let (backend, store) = setup(options);
        backend
            .set("lock:cms:product:id:1", b"stuck", Duration::from_secs(30))
            .await
            .unwrap();

        let value: Product = store
            .get_or_add("product:id:1", || async { Ok::<_, CacheError>(product(1)) }, None)
            .await
            .unwrap();

        assert_eq!(value, product(1));
        assert!(backend.exists("cms:product:id:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_or_add_cancelled_during_retry_delay() {
        let options = CacheOptions {
            retry_delay: Duration::from_secs(30),
            ..CacheOptions::default()
        };
        let (backend, store) = setup(options);
        backend
            .set("lock:cms:k", b"other", Duration::from_secs(30))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<u32> = store
            .get_or_add_cancellable("k", || async { Ok(1) }, None, &cancel)
            .await;

        assert!(matches!(result, Err(CacheError::Cancelled)));
    }

    #[tokio::test]
    async fn test_get_or_add_cancelled_while_computing_releases_lock() {
        let (backend, store) = default_setup();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<u32> = store
            .get_or_add_cancellable(
                "slow",
                || async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(1)
                },
                None,
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(CacheError::Cancelled)));
        assert!(!backend.exists("lock:cms:slow").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_lock_path_computes_once_and_prunes() {
        let options = CacheOptions {
            distributed_locking: false,
            ..CacheOptions::default()
        };
        let (backend, store) = setup(options);

        let value: u32 = store
            .get_or_add("counter", || async { Ok::<_, CacheError>(7) }, None)
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(store.local_lock_count(), 0);
        assert_eq!(backend.command_count("set_if_absent"), 0);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (backend, store) = default_setup();
        store.set("a", &1, None).await.unwrap();
        backend
            .insert_raw("foreign:key", b"1", Duration::from_secs(60))
            .await;

        store.clear_all().await.unwrap();

        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_msgpack_codec_round_trip() {
        let options = CacheOptions {
            codec: Codec::MessagePack,
            ..CacheOptions::default()
        };
        let (_, store) = setup(options);

        store.set("product:id:1", &product(1), None).await.unwrap();
        let value: Option<Product> = store.get("product:id:1").await.unwrap();

        assert_eq!(value, Some(product(1)));
    }

    #[tokio::test]
    async fn test_detailed_logging_does_not_change_results() {
        let options = CacheOptions {
            detailed_logging: true,
            ..CacheOptions::default()
        };
        let (_, store) = setup(options);

        store.set("a", &1, None).await.unwrap();
        assert_eq!(store.get::<i32>("a").await.unwrap(), Some(1));
        store.remove("a").await.unwrap();
        assert_eq!(store.get::<i32>("a").await.unwrap(), None);
    }
}
