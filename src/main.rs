//! CMS Cache - admin server for the distributed cache layer
//!
//! Connects the configured backing store, starts the monitoring loops and
//! serves the operator endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cms_cache::api::{create_router, AppState};
use cms_cache::backend::{InMemoryStore, KeyValueStore, RedisStore};
use cms_cache::config::{BackendConfig, Config};
use cms_cache::tasks::{spawn_expiry_sweeper, spawn_health_check_task, spawn_statistics_task};

/// Main entry point for the cache admin server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables (errors are fatal)
/// 3. Connect the backing store
/// 4. Start statistics, health and (memory backend) expiry loops
/// 5. Serve the admin router until SIGINT/SIGTERM, then cancel the loops
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cms_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CMS cache server");

    let config = Config::from_env().context("invalid cache configuration")?;
    info!(
        prefix = %config.cache.key_prefix,
        codec = %config.cache.codec,
        distributed_locking = config.cache.distributed_locking,
        port = config.server_port,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    let backend: Arc<dyn KeyValueStore> = match &config.backend {
        BackendConfig::Redis { url } => Arc::new(
            RedisStore::connect(url)
                .await
                .context("failed to connect to Redis")?,
        ),
        BackendConfig::Memory { sweep_interval } => {
            let store = Arc::new(InMemoryStore::new());
            handles.push(spawn_expiry_sweeper(
                store.clone(),
                *sweep_interval,
                cancel.clone(),
            ));
            info!("Using in-memory backing store");
            store
        }
    };

    let state = AppState::new(backend, &config);
    handles.push(spawn_statistics_task(
        state.monitoring.clone(),
        config.monitoring.statistics_log_interval,
        cancel.clone(),
    ));
    handles.push(spawn_health_check_task(
        state.health.clone(),
        config.monitoring.health_check_interval,
        cancel.clone(),
    ));
    info!("Background tasks started");

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("server error")?;

    cancel.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then cancels the
/// background loops.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    cancel.cancel();
}
