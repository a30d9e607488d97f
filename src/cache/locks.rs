//! Lock Module
//!
//! Two ways to keep concurrent misses for one key from all running the
//! factory: a lock in the backing store shared by every node, and a
//! per-key mutex local to this process.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::KeyValueStore;
use crate::error::{CacheError, Result};

/// Map size past which idle local locks are swept on acquisition.
pub const DEFAULT_PRUNE_THRESHOLD: usize = 1024;

// == Lock Token ==
/// Random value identifying one acquisition of a distributed lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// == Distributed Lock ==
/// A held `lock:{key}` entry in the backing store.
///
/// Release deletes the entry only if it still holds this token, so a lock
/// that expired and was taken by someone else is never released by us. If the
/// guard is dropped without [`release`](Self::release) (the owning future was
/// cancelled), the compare-and-delete runs on a spawned task.
pub struct DistributedLock {
    backend: Arc<dyn KeyValueStore>,
    key: String,
    token: LockToken,
    released: bool,
}

impl fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("released", &self.released)
            .finish()
    }
}

impl DistributedLock {
    // == Try Acquire ==
    /// Attempts a set-if-absent of `key` with a fresh token. `Ok(None)` means
    /// another holder has it.
    pub async fn try_acquire(
        backend: Arc<dyn KeyValueStore>,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<Self>> {
        let token = LockToken::new();
        if !backend.set_if_absent(key, token.as_bytes(), ttl).await? {
            return Ok(None);
        }
        debug!(lock = %key, token = %token, "Acquired distributed lock");
        Ok(Some(Self {
            backend,
            key: key.to_string(),
            token,
            released: false,
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    // == Release ==
    /// Returns whether this token still owned the lock. Failures are logged;
    /// the TTL frees the lock eventually.
    pub async fn release(mut self) -> bool {
        self.released = true;
        match self
            .backend
            .compare_and_delete(&self.key, self.token.as_bytes())
            .await
        {
            Ok(true) => {
                debug!(lock = %self.key, "Released distributed lock");
                true
            }
            Ok(false) => {
                warn!(lock = %self.key, "Distributed lock expired before release");
                false
            }
            Err(e) => {
                warn!(lock = %self.key, error = %e, "Failed to release distributed lock");
                false
            }
        }
    }
}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let backend = self.backend.clone();
        let key = std::mem::take(&mut self.key);
        let token = self.token.clone();
        handle.spawn(async move {
            if let Err(e) = backend.compare_and_delete(&key, token.as_bytes()).await {
                warn!(lock = %key, error = %e, "Failed to release abandoned distributed lock");
            }
        });
    }
}

// == Local Lock Map ==
/// Per-key async mutexes, created on first use and dropped once nobody holds
/// or waits on them.
#[derive(Debug)]
pub struct LocalLockMap {
    locks: DashMap<String, Arc<Mutex<()>>>,
    prune_threshold: usize,
}

impl Default for LocalLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalLockMap {
    pub fn new() -> Self {
        Self::with_prune_threshold(DEFAULT_PRUNE_THRESHOLD)
    }

    pub fn with_prune_threshold(prune_threshold: usize) -> Self {
        Self {
            locks: DashMap::new(),
            prune_threshold,
        }
    }

    // == Acquire ==
    /// Waits up to `timeout` for the mutex of `key`.
    ///
    /// `Ok(None)` on timeout; `Err(Cancelled)` if `cancel` fires first.
    pub async fn acquire(
        &self,
        key: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<LocalLockGuard<'_>>> {
        if self.locks.len() > self.prune_threshold {
            self.prune_idle();
        }

        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CacheError::Cancelled),
            locked = tokio::time::timeout(timeout, mutex.lock_owned()) => Ok(locked.ok()),
        };

        match outcome {
            Ok(Some(guard)) => Ok(Some(LocalLockGuard {
                map: self,
                key: key.to_string(),
                guard: Some(guard),
            })),
            Ok(None) => {
                self.release(key);
                Ok(None)
            }
            Err(e) => {
                self.release(key);
                Err(e)
            }
        }
    }

    /// Drops the entry for `key` if nobody else references it.
    fn release(&self, key: &str) {
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    // == Prune ==
    /// Removes every idle entry. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held local lock. Dropping it unlocks and prunes the entry when idle.
#[derive(Debug)]
pub struct LocalLockGuard<'a> {
    map: &'a LocalLockMap,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LocalLockGuard<'_> {
    fn drop(&mut self) {
        // Unlock first so our clone of the Arc is gone before the idle check.
        self.guard.take();
        self.map.release(&self.key);
    }
}
