use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use cache::CacheError;
use folio::{FolioError, RateLimitError};
use serde::{Deserialize, Serialize};

pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded, retry in {}s", .0.reset_in.as_secs().max(1))]
    RateLimitExceeded(RateLimitError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Folio setup error: {0}")]
    Folio(#[from] FolioError),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found")]
    NotFound,
}

/// API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServerError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ServerError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Cache(CacheError::InvalidPattern { .. }) => StatusCode::BAD_REQUEST,
            ServerError::Cache(CacheError::InvalidConfig(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Folio(_) | ServerError::Internal(_) | ServerError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::Authentication(_) => "AUTH_FAILED",
            ServerError::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
            ServerError::BadRequest(_) => "BAD_REQUEST",
            ServerError::Cache(_) => "CACHE_ERROR",
            ServerError::Folio(_) => "FOLIO_ERROR",
            ServerError::Unavailable(_) => "UNAVAILABLE",
            ServerError::Internal(_) => "INTERNAL_ERROR",
            ServerError::Config(_) => "CONFIG_ERROR",
            ServerError::NotFound => "NOT_FOUND",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ServerError::RateLimitExceeded(limit) => Some(serde_json::json!({
                "remaining_requests": limit.remaining_requests,
                "reset_in_ms": limit.reset_in.as_millis() as u64,
                "reset_at": limit.reset_at,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = %self, "request failed");
        }

        let retry_after = match &self {
            ServerError::RateLimitExceeded(limit) => {
                HeaderValue::from_str(&limit.reset_in.as_secs().max(1).to_string()).ok()
            }
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        response
    }
}

impl From<std::net::AddrParseError> for ServerError {
    fn from(err: std::net::AddrParseError) -> Self {
        ServerError::Config(format!("Invalid address: {err}"))
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(format!("IO error: {err}"))
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cache_config_errors_are_unprocessable() {
        let err: ServerError = CacheError::InvalidConfig("default_ttl must be > 0".into()).into();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.error_code(), "CACHE_ERROR");
    }

    #[test]
    fn rate_limit_sets_retry_after() {
        let err = ServerError::RateLimitExceeded(RateLimitError {
            bucket: "k".into(),
            remaining_requests: 0,
            reset_in: Duration::from_millis(2500),
            reset_at: chrono::Utc::now(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "2");
    }

    #[test]
    fn rate_limit_details_omit_the_bucket() {
        let err = ServerError::RateLimitExceeded(RateLimitError {
            bucket: "secret-api-key".into(),
            remaining_requests: 0,
            reset_in: Duration::from_millis(1500),
            reset_at: chrono::Utc::now(),
        });
        let details = err.details().unwrap();
        assert_eq!(details["reset_in_ms"], 1500);
        assert!(details.get("bucket").is_none());
        assert!(!details.to_string().contains("secret-api-key"));
        assert!(!err.to_string().contains("secret-api-key"));
    }
}
