//! Cache administration.

use crate::error::ServerResult;
use crate::state::ServerState;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

pub async fn cache_stats(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let cache = state.ctx.cache();
    Json(json!({
        "stats": cache.stats(),
        "config": cache.config(),
    }))
}

/// Runs one cleanup pass now instead of waiting for the background task.
pub async fn run_cleanup(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let report = state.ctx.cache().cleanup();
    tracing::info!(
        expired = report.expired,
        orphans = report.orphans,
        cascaded = report.cascaded,
        "manual cache cleanup"
    );
    Json(report)
}

pub async fn clear_cache(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let cache = state.ctx.cache();
    let removed = cache.len();
    cache.clear();
    tracing::info!(removed, "cache cleared");
    Json(json!({ "removed": removed }))
}

/// Removes every cached key matching a `*` / `?` glob, with cascades.
pub async fn clear_pattern(
    State(state): State<Arc<ServerState>>,
    Path(pattern): Path<String>,
) -> ServerResult<impl IntoResponse> {
    let removed = state.ctx.cache().clear_pattern(&pattern)?;
    Ok(Json(json!({ "pattern": pattern, "removed": removed })))
}

/// Deletes one key and everything that depends on it.
pub async fn delete_key(
    State(state): State<Arc<ServerState>>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let removed = state.ctx.cache().delete(&key);
    Json(json!({ "key": key, "removed": removed }))
}
