use resilience::{ApiError, ApiErrorKind, RateLimitError};
use thiserror::Error;

/// Why an [`ApiClient`](crate::ApiClient) call produced no response.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The call failed upstream, or the breaker refused it.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// The local rate limiter refused the call; nothing was sent.
    #[error(transparent)]
    Throttled(#[from] RateLimitError),
    /// The client could not be constructed.
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            ClientError::Api(err) => Some(err),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<ApiErrorKind> {
        self.api_error().map(ApiError::kind)
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, ClientError::Throttled(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        self.kind() == Some(ApiErrorKind::CircuitBreakerOpen)
    }
}
