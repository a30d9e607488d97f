//! Error types for the cache layer
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache layer.
///
/// Corrupt entries and lock contention are deliberately absent: the first is
/// an explicit decode branch that evicts and reports a miss, the second is
/// resolved by waiting and then computing directly.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backing store unreachable, timed out or rejected a command
    #[error("Backing store error: {0}")]
    Backend(String),

    /// Empty, whitespace-only or control-character key
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// Value could not be encoded for storage
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The caller's cancellation token fired while waiting
    #[error("Cache operation cancelled")]
    Cancelled,

    /// Startup configuration is unusable
    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

// == Config Error Enum ==
/// Fatal configuration problems detected at startup. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting is absent
    #[error("Missing configuration: {0}")]
    Missing(String),

    /// A setting is present but unusable
    #[error("Invalid configuration for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            CacheError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Serialization(_) | CacheError::Configuration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache layer.
pub type Result<T> = std::result::Result<T, CacheError>;
