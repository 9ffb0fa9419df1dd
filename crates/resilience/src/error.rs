//! Failure taxonomy for calls to the content API.
//!
//! Raw transport failures ([`TransportError`]) are turned into an [`ApiError`]
//! exactly once, at the boundary where they are first observed, through the
//! [`Classify`] trait. `ApiError` classifies to itself, so handing an already
//! classified error back to the classifier is harmless.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Shared, type-erased cause attached to an [`ApiError`].
pub type OriginalError = Arc<dyn Error + Send + Sync + 'static>;

/// Category of a failed API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorKind {
    /// The upstream host could not be reached.
    NetworkError,
    /// The call did not complete in time.
    TimeoutError,
    /// Upstream answered 429.
    RateLimitError,
    /// Upstream answered 5xx.
    ServerError,
    /// Upstream answered 4xx other than 429.
    ClientError,
    /// The local circuit breaker refused the call.
    CircuitBreakerOpen,
    /// Anything else, including cancellation and undecodable bodies.
    UnknownError,
}

impl ApiErrorKind {
    pub const ALL: [ApiErrorKind; 7] = [
        ApiErrorKind::NetworkError,
        ApiErrorKind::TimeoutError,
        ApiErrorKind::RateLimitError,
        ApiErrorKind::ServerError,
        ApiErrorKind::ClientError,
        ApiErrorKind::CircuitBreakerOpen,
        ApiErrorKind::UnknownError,
    ];

    /// Whether an error of this kind may succeed if attempted again.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ApiErrorKind::NetworkError
                | ApiErrorKind::TimeoutError
                | ApiErrorKind::RateLimitError
                | ApiErrorKind::ServerError
        )
    }

    /// Whether the failure says something about upstream health and should
    /// count against the circuit breaker.
    pub fn indicates_unhealthy_upstream(self) -> bool {
        matches!(
            self,
            ApiErrorKind::NetworkError | ApiErrorKind::TimeoutError | ApiErrorKind::ServerError
        )
    }

    /// Maps an HTTP status that is not a success into a kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => ApiErrorKind::RateLimitError,
            400..=499 => ApiErrorKind::ClientError,
            500..=599 => ApiErrorKind::ServerError,
            _ => ApiErrorKind::UnknownError,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApiErrorKind::NetworkError => "NETWORK_ERROR",
            ApiErrorKind::TimeoutError => "TIMEOUT_ERROR",
            ApiErrorKind::RateLimitError => "RATE_LIMIT_ERROR",
            ApiErrorKind::ServerError => "SERVER_ERROR",
            ApiErrorKind::ClientError => "CLIENT_ERROR",
            ApiErrorKind::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            ApiErrorKind::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified API failure.
///
/// Fields are private: an `ApiError` is assembled once with the `with_*`
/// builders at the classification boundary and is read-only afterwards.
/// Cloning is cheap, the original cause is shared.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    #[serde(rename = "type")]
    kind: ApiErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    timestamp: DateTime<Utc>,
    #[serde(
        rename = "retryAfterMs",
        with = "crate::serde_millis::option",
        skip_serializing_if = "Option::is_none"
    )]
    retry_after: Option<Duration>,
    #[serde(skip)]
    original_error: Option<OriginalError>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            retryable: kind.is_retryable(),
            endpoint: None,
            timestamp: Utc::now(),
            retry_after: None,
            original_error: None,
        }
    }

    /// Fail-fast error produced while the breaker refuses calls.
    pub fn circuit_open(endpoint: Option<&str>) -> Self {
        let err = Self::new(
            ApiErrorKind::CircuitBreakerOpen,
            "circuit breaker is open; upstream is considered unhealthy",
        );
        match endpoint {
            Some(endpoint) => err.with_endpoint(endpoint),
            None => err,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        self.original_error = Some(Arc::new(source));
        self
    }

    pub fn kind(&self) -> ApiErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Upstream `Retry-After` hint, only ever present on rate-limit errors.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn original_error(&self) -> Option<&OriginalError> {
        self.original_error.as_ref()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(endpoint) = &self.endpoint {
            write!(f, " ({endpoint})")?;
        }
        Ok(())
    }
}

impl Error for ApiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.original_error
            .as_deref()
            .map(|err| err as &(dyn Error + 'static))
    }
}

/// Failure reported by a transport before classification.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// DNS, connect, TLS or reset failures.
    #[error("network failure: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    /// The upstream answered with a non-success status.
    #[error("upstream responded with HTTP {status}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: Option<String>,
    },
    #[error("could not decode response body: {0}")]
    Decode(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// Conversion of a failure into the [`ApiError`] taxonomy.
pub trait Classify {
    fn classify(self, endpoint: Option<&str>) -> ApiError;
}

impl Classify for ApiError {
    fn classify(self, _endpoint: Option<&str>) -> ApiError {
        self
    }
}

impl Classify for TransportError {
    fn classify(self, endpoint: Option<&str>) -> ApiError {
        let err = match &self {
            TransportError::Network(msg) => ApiError::new(ApiErrorKind::NetworkError, msg.clone()),
            TransportError::Timeout => {
                ApiError::new(ApiErrorKind::TimeoutError, "request timed out")
            }
            TransportError::Status {
                status,
                retry_after,
                body,
            } => {
                let kind = ApiErrorKind::from_status(*status);
                let message = match body.as_deref().map(str::trim) {
                    Some(body) if !body.is_empty() => {
                        format!("HTTP {status}: {}", truncate(body, 200))
                    }
                    _ => format!("HTTP {status}"),
                };
                let err = ApiError::new(kind, message).with_status(*status);
                if kind == ApiErrorKind::RateLimitError {
                    err.with_retry_after(*retry_after)
                } else {
                    err
                }
            }
            TransportError::Decode(msg) => {
                ApiError::new(ApiErrorKind::UnknownError, format!("invalid response: {msg}"))
            }
            TransportError::Cancelled => ApiError::new(ApiErrorKind::UnknownError, "request cancelled"),
            TransportError::Other(msg) => ApiError::new(ApiErrorKind::UnknownError, msg.clone()),
        };

        let err = match endpoint {
            Some(endpoint) => err.with_endpoint(endpoint),
            None => err,
        };
        err.with_source(self)
    }
}

/// Free-function form of [`Classify::classify`].
pub fn classify<E: Classify>(err: E, endpoint: Option<&str>) -> ApiError {
    err.classify(endpoint)
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16) -> TransportError {
        TransportError::Status {
            status,
            retry_after: None,
            body: None,
        }
    }

    #[test]
    fn status_codes_map_to_kinds() {
        assert_eq!(
            status(429).classify(None).kind(),
            ApiErrorKind::RateLimitError
        );
        assert_eq!(status(404).classify(None).kind(), ApiErrorKind::ClientError);
        assert_eq!(status(400).classify(None).kind(), ApiErrorKind::ClientError);
        assert_eq!(status(503).classify(None).kind(), ApiErrorKind::ServerError);
        assert_eq!(status(500).classify(None).kind(), ApiErrorKind::ServerError);
        assert_eq!(status(302).classify(None).kind(), ApiErrorKind::UnknownError);
    }

    #[test]
    fn retryable_follows_kind() {
        for kind in ApiErrorKind::ALL {
            let err = ApiError::new(kind, "x");
            assert_eq!(err.is_retryable(), kind.is_retryable(), "{kind}");
        }
        assert!(!ApiErrorKind::ClientError.is_retryable());
        assert!(!ApiErrorKind::CircuitBreakerOpen.is_retryable());
        assert!(!ApiErrorKind::UnknownError.is_retryable());
        assert!(ApiErrorKind::RateLimitError.is_retryable());
    }

    #[test]
    fn only_network_timeout_and_server_errors_mark_upstream_unhealthy() {
        let unhealthy: Vec<_> = ApiErrorKind::ALL
            .into_iter()
            .filter(|k| k.indicates_unhealthy_upstream())
            .collect();
        assert_eq!(
            unhealthy,
            vec![
                ApiErrorKind::NetworkError,
                ApiErrorKind::TimeoutError,
                ApiErrorKind::ServerError
            ]
        );
    }

    #[test]
    fn reclassifying_is_identity() {
        let first = TransportError::Network("connection refused".into()).classify(Some("/posts"));
        let stamp = first.timestamp();
        let again = first.clone().classify(Some("/other"));

        assert_eq!(again.kind(), ApiErrorKind::NetworkError);
        assert_eq!(again.endpoint(), Some("/posts"));
        assert_eq!(again.timestamp(), stamp);
        assert_eq!(again.message(), first.message());
    }

    #[test]
    fn retry_after_is_kept_only_for_rate_limits() {
        let limited = TransportError::Status {
            status: 429,
            retry_after: Some(Duration::from_secs(7)),
            body: None,
        }
        .classify(None);
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(7)));

        let server = TransportError::Status {
            status: 503,
            retry_after: Some(Duration::from_secs(7)),
            body: None,
        }
        .classify(None);
        assert_eq!(server.retry_after(), None);
    }

    #[test]
    fn original_error_is_exposed_as_source() {
        let err = TransportError::Timeout.classify(Some("/media"));
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "request timed out");
        assert!(err.original_error().is_some());
    }

    #[test]
    fn cancellation_is_unknown_and_final() {
        let err = TransportError::Cancelled.classify(None);
        assert_eq!(err.kind(), ApiErrorKind::UnknownError);
        assert!(!err.is_retryable());
    }

    #[test]
    fn circuit_open_error_is_not_retryable() {
        let err = ApiError::circuit_open(Some("/posts"));
        assert_eq!(err.kind(), ApiErrorKind::CircuitBreakerOpen);
        assert!(!err.is_retryable());
        assert_eq!(err.endpoint(), Some("/posts"));
    }

    #[test]
    fn wire_shape_uses_type_and_camel_case() {
        let err = status(502).classify(Some("/posts"));
        let value = serde_json::to_value(&err).unwrap();

        assert_eq!(value["type"], "SERVER_ERROR");
        assert_eq!(value["statusCode"], 502);
        assert_eq!(value["retryable"], true);
        assert_eq!(value["endpoint"], "/posts");
        assert!(value["timestamp"].as_str().is_some());
        assert!(value.get("originalError").is_none());
        assert!(value.get("retryAfterMs").is_none());
    }

    #[test]
    fn long_bodies_are_truncated_in_message() {
        let err = TransportError::Status {
            status: 500,
            retry_after: None,
            body: Some("x".repeat(1000)),
        }
        .classify(None);
        assert!(err.message().len() < 300);
        assert!(err.message().starts_with("HTTP 500: "));
    }

    #[test]
    fn display_includes_kind_and_endpoint() {
        let err = ApiError::new(ApiErrorKind::TimeoutError, "slow").with_endpoint("/media");
        assert_eq!(err.to_string(), "TIMEOUT_ERROR: slow (/media)");
    }
}
