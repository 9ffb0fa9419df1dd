use crate::state::ServerState;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    pub category: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub limit: Option<usize>,
}

/// Retained events, oldest first, optionally filtered by category and type.
/// `limit` keeps the newest N after filtering.
pub async fn list_events(
    State(state): State<Arc<ServerState>>,
    Query(filter): Query<EventFilter>,
) -> impl IntoResponse {
    let telemetry = state.ctx.telemetry();
    let mut events = match &filter.category {
        Some(category) => telemetry.events_by_category(category),
        None => telemetry.events(),
    };
    if let Some(event_type) = &filter.event_type {
        events.retain(|e| &e.event_type == event_type);
    }
    if let Some(limit) = filter.limit {
        let skip = events.len().saturating_sub(limit);
        events.drain(..skip);
    }

    Json(json!({
        "count": events.len(),
        "events": events,
    }))
}

pub async fn clear_events(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let telemetry = state.ctx.telemetry();
    let cleared = telemetry.len();
    telemetry.clear();
    Json(json!({ "cleared": cleared }))
}
