//! API Routes
//!
//! Configures the Axum router with all admin endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, health_handler, remove_key_handler, remove_pattern_handler,
    reset_stats_handler, stats_handler, AppState,
};

/// Creates the admin router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Backing store liveness
/// - `GET /stats` - Statistics report with alerts
/// - `POST /stats/reset` - Zero the statistics
/// - `DELETE /cache/keys/:key` - Remove one key
/// - `DELETE /cache?pattern=...` - Remove keys matching a glob
/// - `POST /cache/clear` - Flush the backing database
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/stats/reset", post(reset_stats_handler))
        .route("/cache", delete(remove_pattern_handler))
        .route("/cache/keys/:key", delete(remove_key_handler))
        .route("/cache/clear", post(clear_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
