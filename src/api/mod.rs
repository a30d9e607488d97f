//! API Module
//!
//! Operator-facing HTTP surface over the cache layer.
//!
//! # Endpoints
//! - `GET /health` - Backing store liveness
//! - `GET /stats` - Statistics report with alerts
//! - `POST /stats/reset` - Zero the statistics
//! - `DELETE /cache/keys/:key` - Remove one key
//! - `DELETE /cache?pattern=...` - Remove keys matching a glob
//! - `POST /cache/clear` - Flush the backing database

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
