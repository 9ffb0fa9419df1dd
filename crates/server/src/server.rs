//! Router assembly and the serve loop.

use crate::config::ServerConfig;
use crate::middleware::{api_key_auth, log_requests, request_id};
use crate::routes::{api_info, not_found};
use crate::routes::{cache, circuit, health, telemetry};
use crate::state::ServerState;
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the Axum router with all routes and middleware
///
/// Public routes (`/`, `/health`, `/ready`, `/metrics`, `/telemetry`) need no
/// credentials; everything under `/api/v1` requires an API key and counts
/// against that key's per-minute window.
pub fn build_router(state: Arc<ServerState>) -> Router {
    let cors = if state.config.enable_cors {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    let public_routes = Router::new()
        .route("/", get(api_info))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics))
        .route("/telemetry", get(health::telemetry_summary));

    let protected_routes = Router::new()
        // Cache
        .route("/api/v1/cache", delete(cache::clear_cache))
        .route("/api/v1/cache/stats", get(cache::cache_stats))
        .route("/api/v1/cache/cleanup", post(cache::run_cleanup))
        .route("/api/v1/cache/keys/{pattern}", delete(cache::clear_pattern))
        .route("/api/v1/cache/key/{key}", delete(cache::delete_key))
        // Circuit breaker and upstream limiter
        .route("/api/v1/circuit", get(circuit::circuit_status))
        .route("/api/v1/circuit/reset", post(circuit::reset_circuit))
        .route("/api/v1/rate-limit", get(circuit::rate_limit_status))
        .route("/api/v1/rate-limit/reset", post(circuit::reset_rate_limit))
        // Telemetry
        .route("/api/v1/telemetry", delete(telemetry::clear_events))
        .route("/api/v1/telemetry/events", get(telemetry::list_events))
        // Metadata
        .route("/api/v1/metadata", get(health::server_metadata))
        .layer(from_fn_with_state(state.clone(), api_key_auth));

    // Last layer added runs first: request ids exist before logging.
    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(not_found)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.timeout(),
        ))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(from_fn(log_requests))
        .layer(from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Folio server
///
/// Initializes JSON logging, builds the Folio context from
/// `config.folio_config`, starts its background cache cleanup and serves
/// until Ctrl+C or SIGTERM. Shutdown stops the background tasks before
/// returning.
pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json()
        .init();

    let state = Arc::new(ServerState::new(config.clone())?);
    let ctx = state.ctx.clone();
    let cleanup_started = ctx.start_background_tasks();

    let app = build_router(state);
    let addr: SocketAddr = config.socket_addr()?;

    tracing::info!(
        %addr,
        api_keys = config.api_keys.len(),
        timeout_secs = config.timeout_secs,
        rate_limit_per_minute = config.rate_limit_per_minute,
        cors = config.enable_cors,
        metrics = config.metrics_enabled,
        cleanup_started,
        "starting folio server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ctx.shutdown().await;
    tracing::info!("server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A handler that fails to install is logged
/// and never fires.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
