//! Cache Module
//!
//! Key derivation, value encoding, stampede-safe reads and bulk invalidation
//! over a pluggable backing store.

mod codec;
mod invalidation;
mod keys;
mod locks;
mod store;
mod value;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use codec::{Codec, Decoded};
pub use invalidation::{related_patterns, InvalidationService};
pub use keys::{entity_name, is_valid_key, KeyService, QUERY_HASH_LEN};
pub use locks::{DistributedLock, LocalLockGuard, LocalLockMap, LockToken};
pub use store::{CacheStore, Expiration, LOCK_KEY_PREFIX, PATTERN_BATCH_SIZE};
pub use value::{FieldMap, FieldValue};
