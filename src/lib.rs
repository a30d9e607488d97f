//! CMS Cache - distributed cache layer for a multi-tenant CMS backend
//!
//! Stampede-safe get-or-compute over Redis or an in-process store, with
//! deterministic key derivation, pattern invalidation and monitoring.

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod monitoring;
pub mod tasks;

pub use api::AppState;
pub use backend::{InMemoryStore, KeyValueStore, RedisStore};
pub use cache::{CacheStore, Expiration, InvalidationService, KeyService};
pub use config::{CacheOptions, Config};
pub use error::{CacheError, ConfigError, Result};
