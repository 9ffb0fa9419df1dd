use crate::error::{ServerError, ServerResult};
use crate::state::{ServerMetadata, ServerState};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use folio::CircuitState;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const DEFAULT_RECENT: usize = 20;

/// Health check endpoint (liveness)
/// Returns 200 if server is running
pub async fn health_check(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "folio-server",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
    }))
}

/// Readiness check endpoint
///
/// 503 while the upstream circuit is open: every outbound call would fail
/// fast until the cool-down elapses.
pub async fn readiness_check(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let circuit = state.ctx.circuit_breaker().state();
    let limit = state.ctx.rate_limiter().info();
    let ready = circuit != CircuitState::Open;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = Json(json!({
        "status": if ready { "ready" } else { "degraded" },
        "service": "folio-server",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
        "components": {
            "circuit": circuit.as_str(),
            "cache_entries": state.ctx.cache().len(),
            "rate_limit_remaining": limit.remaining_requests,
        }
    }));

    (status, body)
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<Arc<ServerState>>) -> ServerResult<impl IntoResponse> {
    let handle = state
        .prometheus
        .as_ref()
        .ok_or_else(|| ServerError::Unavailable("metrics exporter is disabled".to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    pub recent: Option<usize>,
}

/// Telemetry summary with the `recent` newest events.
pub async fn telemetry_summary(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<SummaryParams>,
) -> impl IntoResponse {
    let recent = params.recent.unwrap_or(DEFAULT_RECENT);
    Json(state.ctx.telemetry().summary(recent))
}

/// Server metadata endpoint (authenticated)
pub async fn server_metadata(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let metadata = ServerMetadata {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
    };

    Json(json!({
        "server": metadata,
        "folio": {
            "name": state.ctx.config().name,
            "base_url": state.ctx.config().client.base_url,
            "circuit_breaker": state.ctx.config().circuit_breaker,
            "retry": state.ctx.config().retry,
            "rate_limit": state.ctx.config().rate_limit,
            "cache": state.ctx.config().cache,
        }
    }))
}
