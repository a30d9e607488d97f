//! Backing Store Module
//!
//! The primitives the cache layer needs from a key/value store, and two
//! implementations: Redis for shared deployments and an in-process store for
//! single-node use and tests.

mod entry;
mod glob;
mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use entry::{current_timestamp_ms, CacheEntry};
pub use glob::{escape_glob, glob_match};
pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

// == Scan Page ==
/// One page of a cursor-based key enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next call; `None` once enumeration is complete
    pub cursor: Option<String>,
    pub keys: Vec<String>,
}

// == Key Value Store ==
/// Operations a backing store must provide. All keys are already normalized.
#[async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Writes only if the key is absent. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Returns the number of keys that existed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Resets the expiration of an existing key. Returns whether it existed.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Values in the same order as `keys`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    async fn set_many(&self, entries: &[(String, Vec<u8>)], ttl: Duration) -> Result<()>;

    /// Enumerates keys matching a glob `pattern`, about `count` per page.
    /// Pass `None` to start.
    async fn scan(&self, cursor: Option<&str>, pattern: &str, count: usize) -> Result<ScanPage>;

    /// Round trip to the store.
    async fn ping(&self) -> Result<()>;

    /// Deletes the key only if its current value equals `expected`, atomically.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// Removes every key in the database.
    async fn flush(&self) -> Result<()>;

    /// Number of live keys.
    async fn entry_count(&self) -> Result<u64>;
}
