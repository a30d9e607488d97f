//! API Handlers
//!
//! HTTP request handlers for each admin endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::backend::KeyValueStore;
use crate::cache::{CacheStore, InvalidationService};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    HealthResponse, MessageResponse, PatternQuery, PatternRemoveResponse, RemoveResponse,
    StatsResponse,
};
use crate::monitoring::{CacheStatistics, HealthCheckService, MonitoringService};

/// Application state shared across all handlers.
///
/// Every service shares one backing store and one statistics instance.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: Arc<CacheStore>,
    pub invalidation: InvalidationService,
    pub monitoring: Arc<MonitoringService>,
    pub health: Arc<HealthCheckService>,
}

impl AppState {
    /// Wires the cache services over `backend` using the given configuration.
    pub fn new(backend: Arc<dyn KeyValueStore>, config: &Config) -> Self {
        let metrics = Arc::new(CacheStatistics::new());
        let store = Arc::new(CacheStore::with_metrics(
            backend.clone(),
            config.cache.clone(),
            metrics.clone(),
        ));
        Self {
            invalidation: InvalidationService::new(store.clone()),
            monitoring: Arc::new(MonitoringService::new(
                backend.clone(),
                metrics,
                &config.monitoring,
            )),
            health: Arc::new(HealthCheckService::new(backend)),
            store,
        }
    }
}

/// Handler for GET /health
///
/// 200 while the backing store answers pings in time, 503 otherwise.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let report = state.health.check().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(HealthResponse::from(report)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.monitoring.report().await))
}

/// Handler for POST /stats/reset
pub async fn reset_stats_handler(State(state): State<AppState>) -> Json<MessageResponse> {
    state.monitoring.reset_statistics();
    Json(MessageResponse::new("Statistics reset"))
}

/// Handler for DELETE /cache/keys/:key
///
/// Removing a key that does not exist still succeeds.
pub async fn remove_key_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<RemoveResponse>> {
    state.store.remove(&key).await?;
    Ok(Json(RemoveResponse::new(key)))
}

/// Handler for DELETE /cache?pattern=...
pub async fn remove_pattern_handler(
    State(state): State<AppState>,
    Query(query): Query<PatternQuery>,
) -> Result<Json<PatternRemoveResponse>> {
    if let Some(error_msg) = query.validate() {
        return Err(CacheError::InvalidKey(error_msg));
    }

    let removed = state.invalidation.invalidate_pattern(&query.pattern).await?;
    Ok(Json(PatternRemoveResponse::new(query.pattern, removed)))
}

/// Handler for POST /cache/clear
///
/// Flushes the whole backing database, not only this prefix.
pub async fn clear_handler(State(state): State<AppState>) -> Result<Json<MessageResponse>> {
    state.store.clear_all().await?;
    Ok(Json(MessageResponse::new("Cache cleared")))
}
