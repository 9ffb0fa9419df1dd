//! Request plumbing shared by every route: ids, access logs and API keys.

use crate::error::ServerError;
use crate::state::ServerState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use folio::RateLimitInfo;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

const MAX_REQUEST_ID_LEN: usize = 128;

/// The caller's key: `X-API-Key` first, then an `Authorization: Bearer` token.
pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, API_KEY_HEADER)
        .or_else(|| header_str(headers, AUTHORIZATION.as_str())?.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Rejects unknown keys, then charges the request to the key's window.
///
/// Admitted responses carry the window's remaining budget and the seconds
/// until it resets.
pub async fn api_key_auth(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let key = extract_api_key(request.headers())
        .ok_or_else(|| {
            ServerError::Authentication(format!(
                "missing API key; send '{API_KEY_HEADER}' or 'Authorization: Bearer <key>'"
            ))
        })?
        .to_owned();

    if !state.is_valid_api_key(&key) {
        return Err(ServerError::Authentication("unknown API key".into()));
    }
    state
        .check_rate_limit(&key)
        .map_err(ServerError::RateLimitExceeded)?;
    let window = state.key_limiter.info_for(&key);

    let mut response = next.run(request).await;
    set_window_headers(response.headers_mut(), &window);
    Ok(response)
}

fn set_window_headers(headers: &mut HeaderMap, window: &RateLimitInfo) {
    headers.insert(
        RATE_LIMIT_REMAINING_HEADER,
        HeaderValue::from(window.remaining_requests),
    );
    headers.insert(
        RATE_LIMIT_RESET_HEADER,
        HeaderValue::from(window.reset_in.as_secs()),
    );
}

/// Correlation id for one request, visible to handlers as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    /// Reuses a sane inbound `x-request-id`, otherwise mints a UUID.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        header_str(headers, REQUEST_ID_HEADER)
            .map(str::trim)
            .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
            .map(|id| Self(id.to_owned()))
            .unwrap_or_else(|| Self(uuid::Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = RequestId::from_headers(request.headers());
    request.extensions_mut().insert(id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// One access-log line per request, inside a span carrying the request id.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.as_str().to_owned())
        .unwrap_or_default();
    let span = tracing::info_span!("http", %method, %path, request_id = %id);

    let started = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    let elapsed = started.elapsed();
    let status = response.status();

    let elapsed_ms = elapsed.as_millis() as u64;
    span.in_scope(|| {
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), elapsed_ms, "request failed");
        } else {
            tracing::info!(status = status.as_u16(), elapsed_ms, "request served");
        }
    });

    metrics::counter!(
        "folio_server_requests_total",
        "method" => method.to_string(),
        "status" => status.as_u16().to_string(),
    )
    .increment(1);
    metrics::histogram!("folio_server_request_duration_seconds", "method" => method.to_string())
        .record(elapsed.as_secs_f64());

    response
}
