//! Circuit breaker and upstream rate limiter administration.

use crate::state::ServerState;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

pub async fn circuit_status(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.ctx.circuit_breaker().snapshot())
}

/// Forces the breaker closed.
pub async fn reset_circuit(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let breaker = state.ctx.circuit_breaker();
    breaker.reset();
    tracing::info!("circuit breaker reset by operator");
    Json(breaker.snapshot())
}

pub async fn rate_limit_status(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let limiter = state.ctx.rate_limiter();
    let buckets: BTreeMap<String, _> = limiter
        .all_stats()
        .into_iter()
        .map(|(bucket, stats)| {
            let rejection_rate = stats.rejection_rate();
            (bucket, json!({ "stats": stats, "rejection_rate": rejection_rate }))
        })
        .collect();

    Json(json!({
        "current": limiter.info(),
        "buckets": buckets,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ResetParams {
    pub bucket: Option<String>,
}

/// Starts a fresh window on `?bucket=`, or on every bucket.
pub async fn reset_rate_limit(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<ResetParams>,
) -> impl IntoResponse {
    let limiter = state.ctx.rate_limiter();
    match &params.bucket {
        Some(bucket) => limiter.reset_bucket(bucket),
        None => limiter.reset_all(),
    }
    tracing::info!(bucket = params.bucket.as_deref().unwrap_or("*"), "rate limit reset by operator");
    Json(limiter.info())
}
