//! API route handlers
//!
//! - `health`: liveness, readiness, Prometheus metrics and the telemetry summary
//! - `cache`: cache statistics, cleanup and invalidation
//! - `circuit`: circuit breaker and upstream rate limiter state
//! - `telemetry`: raw event listing

pub mod cache;
pub mod circuit;
pub mod health;
pub mod telemetry;

use crate::error::{ServerError, ServerResult};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// API version and base info (GET /, no authentication).
pub async fn api_info() -> ServerResult<impl IntoResponse> {
    Ok(Json(json!({
        "name": "Folio Server",
        "version": env!("CARGO_PKG_VERSION"),
        "api_version": "v1",
        "endpoints": [
            "/health",
            "/ready",
            "/metrics",
            "/telemetry",
            "/api/v1/cache/stats",
            "/api/v1/cache/cleanup",
            "/api/v1/cache",
            "/api/v1/cache/keys/{pattern}",
            "/api/v1/cache/key/{key}",
            "/api/v1/circuit",
            "/api/v1/circuit/reset",
            "/api/v1/rate-limit",
            "/api/v1/rate-limit/reset",
            "/api/v1/telemetry/events",
            "/api/v1/telemetry",
            "/api/v1/metadata"
        ]
    })))
}

/// 404 Not Found handler
pub async fn not_found() -> ServerError {
    ServerError::NotFound
}
