//! Configuration Module
//!
//! Loads cache, monitoring and server settings from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::Codec;
use crate::error::ConfigError;

/// Length of the hex-encoded SHA-256 digest used for over-length keys.
const HASH_SEGMENT_LEN: usize = 64;

// == Cache Options ==
/// Settings that shape key derivation and the get-or-add protocol.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Namespace prepended to every key
    pub key_prefix: String,
    /// Joins key segments
    pub key_separator: String,
    /// Expiration applied when a write names none
    pub default_expiration: Duration,
    /// Expiration for volatile data
    pub short_expiration: Duration,
    /// Expiration for rarely changing data
    pub long_expiration: Duration,
    /// TTL of a distributed lock and upper bound on a local lock wait
    pub lock_timeout: Duration,
    /// Wait before re-checking when another node holds the lock
    pub retry_delay: Duration,
    /// Normalized keys longer than this are replaced by their hashed form
    pub max_key_length: usize,
    /// Coordinate computation through the backing store instead of in-process
    pub distributed_locking: bool,
    /// Log every hit and miss at debug level
    pub detailed_logging: bool,
    /// Wire format of stored values
    pub codec: Codec,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            key_prefix: "cms".to_string(),
            key_separator: ":".to_string(),
            default_expiration: Duration::from_secs(1800),
            short_expiration: Duration::from_secs(300),
            long_expiration: Duration::from_secs(7200),
            lock_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_millis(100),
            max_key_length: 250,
            distributed_locking: true,
            detailed_logging: false,
            codec: Codec::Json,
        }
    }
}

impl CacheOptions {
    /// Length of `{prefix}{separator}hash:{digest}`.
    pub fn hashed_key_length(&self) -> usize {
        self.key_prefix.len() + self.key_separator.len() + "hash:".len() + HASH_SEGMENT_LEN
    }

    // == Validate ==
    /// Rejects settings the cache cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_prefix.trim().is_empty() {
            return Err(invalid("CACHE_KEY_PREFIX", "must not be empty"));
        }
        if self.key_prefix.chars().any(char::is_control) {
            return Err(invalid("CACHE_KEY_PREFIX", "must not contain control characters"));
        }
        if self.key_separator.is_empty() {
            return Err(invalid("CACHE_KEY_SEPARATOR", "must not be empty"));
        }
        if self.default_expiration.is_zero()
            || self.short_expiration.is_zero()
            || self.long_expiration.is_zero()
        {
            return Err(invalid("CACHE_*_EXPIRATION_SECS", "must be greater than zero"));
        }
        if self.lock_timeout.is_zero() {
            return Err(invalid("CACHE_LOCK_TIMEOUT_SECS", "must be greater than zero"));
        }
        if self.max_key_length < self.hashed_key_length() {
            return Err(invalid(
                "CACHE_MAX_KEY_LENGTH",
                &format!(
                    "must be at least {} to hold a hashed key",
                    self.hashed_key_length()
                ),
            ));
        }
        Ok(())
    }
}

// == Monitoring Options ==
/// Schedules of the background statistics and health loops.
#[derive(Debug, Clone)]
pub struct MonitoringOptions {
    pub health_check_interval: Duration,
    pub statistics_log_interval: Duration,
    /// Statistics are zeroed once this much time has passed since the last reset
    pub statistics_reset_horizon: Duration,
}

impl Default for MonitoringOptions {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            statistics_log_interval: Duration::from_secs(300),
            statistics_reset_horizon: Duration::from_secs(24 * 3600),
        }
    }
}

impl MonitoringOptions {
    /// Rejects schedules that would spin the background loops.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health_check_interval.is_zero() {
            return Err(invalid(
                "CACHE_HEALTH_CHECK_INTERVAL_SECS",
                "must be greater than zero",
            ));
        }
        if self.statistics_log_interval.is_zero() {
            return Err(invalid(
                "CACHE_STATS_LOG_INTERVAL_SECS",
                "must be greater than zero",
            ));
        }
        if self.statistics_reset_horizon.is_zero() {
            return Err(invalid("CACHE_STATS_RESET_HOURS", "must be greater than zero"));
        }
        Ok(())
    }
}

// == Backend Selection ==
/// Which backing store the binary connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Shared Redis instance
    Redis { url: String },
    /// Process-local store, swept for expired entries at the given interval
    Memory { sweep_interval: Duration },
}

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache: CacheOptions,
    pub monitoring: MonitoringOptions,
    pub backend: BackendConfig,
    /// HTTP port of the admin surface
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_BACKEND` - `redis` or `memory` (default: memory)
    /// - `REDIS_URL` - required when the backend is redis
    /// - `CACHE_KEY_PREFIX` / `CACHE_KEY_SEPARATOR` (default: `cms` / `:`)
    /// - `CACHE_DEFAULT_EXPIRATION_SECS` (1800), `CACHE_SHORT_EXPIRATION_SECS` (300),
    ///   `CACHE_LONG_EXPIRATION_SECS` (7200)
    /// - `CACHE_LOCK_TIMEOUT_SECS` (30), `CACHE_RETRY_DELAY_MS` (100)
    /// - `CACHE_MAX_KEY_LENGTH` (250)
    /// - `CACHE_DISTRIBUTED_LOCKING` (true), `CACHE_DETAILED_LOGGING` (false)
    /// - `CACHE_CODEC` - `json` or `msgpack` (default: json)
    /// - `CACHE_HEALTH_CHECK_INTERVAL_SECS` (30), `CACHE_STATS_LOG_INTERVAL_SECS` (300),
    ///   `CACHE_STATS_RESET_HOURS` (24)
    /// - `CACHE_SWEEP_INTERVAL_SECS` (1) - memory backend only
    /// - `SERVER_PORT` (3000)
    ///
    /// Unparsable values fall back to the default; missing connection info
    /// for the redis backend and inconsistent settings are fatal.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = CacheOptions::default();
        let cache = CacheOptions {
            key_prefix: env::var("CACHE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            key_separator: env::var("CACHE_KEY_SEPARATOR").unwrap_or(defaults.key_separator),
            default_expiration: env_secs(
                "CACHE_DEFAULT_EXPIRATION_SECS",
                defaults.default_expiration,
            ),
            short_expiration: env_secs("CACHE_SHORT_EXPIRATION_SECS", defaults.short_expiration),
            long_expiration: env_secs("CACHE_LONG_EXPIRATION_SECS", defaults.long_expiration),
            lock_timeout: env_secs("CACHE_LOCK_TIMEOUT_SECS", defaults.lock_timeout),
            retry_delay: env_parse("CACHE_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            max_key_length: env_parse("CACHE_MAX_KEY_LENGTH").unwrap_or(defaults.max_key_length),
            distributed_locking: env_parse("CACHE_DISTRIBUTED_LOCKING")
                .unwrap_or(defaults.distributed_locking),
            detailed_logging: env_parse("CACHE_DETAILED_LOGGING")
                .unwrap_or(defaults.detailed_logging),
            codec: env_parse("CACHE_CODEC").unwrap_or(defaults.codec),
        };
        cache.validate()?;

        let monitoring_defaults = MonitoringOptions::default();
        let monitoring = MonitoringOptions {
            health_check_interval: env_secs(
                "CACHE_HEALTH_CHECK_INTERVAL_SECS",
                monitoring_defaults.health_check_interval,
            ),
            statistics_log_interval: env_secs(
                "CACHE_STATS_LOG_INTERVAL_SECS",
                monitoring_defaults.statistics_log_interval,
            ),
            statistics_reset_horizon: match env_parse::<u64>("CACHE_STATS_RESET_HOURS") {
                Some(hours) => hours
                    .checked_mul(3600)
                    .map(Duration::from_secs)
                    .ok_or_else(|| invalid("CACHE_STATS_RESET_HOURS", "out of range"))?,
                None => monitoring_defaults.statistics_reset_horizon,
            },
        };
        monitoring.validate()?;

        let backend = match env::var("CACHE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "redis" => {
                let url = env::var("REDIS_URL")
                    .ok()
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| ConfigError::Missing("REDIS_URL".to_string()))?;
                BackendConfig::Redis { url }
            }
            "memory" => {
                let sweep_interval =
                    env_secs("CACHE_SWEEP_INTERVAL_SECS", Duration::from_secs(1));
                if sweep_interval.is_zero() {
                    return Err(invalid(
                        "CACHE_SWEEP_INTERVAL_SECS",
                        "must be greater than zero",
                    ));
                }
                BackendConfig::Memory { sweep_interval }
            }
            other => {
                return Err(invalid(
                    "CACHE_BACKEND",
                    &format!("unknown backend '{}', expected redis or memory", other),
                ))
            }
        };

        Ok(Self {
            cache,
            monitoring,
            backend,
            server_port: env_parse("SERVER_PORT").unwrap_or(3000),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheOptions::default(),
            monitoring: MonitoringOptions::default(),
            backend: BackendConfig::Memory {
                sweep_interval: Duration::from_secs(1),
            },
            server_port: 3000,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_secs(name: &str, default: Duration) -> Duration {
    env_parse(name).map(Duration::from_secs).unwrap_or(default)
}

fn invalid(name: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}
