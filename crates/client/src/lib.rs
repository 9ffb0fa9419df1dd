//! Content-API client.
//!
//! [`ApiClient`] wraps a [`Transport`] with the resilience primitives from the
//! `resilience` crate:
//!
//! 1. **Circuit breaker**: fail fast with `CIRCUIT_BREAKER_OPEN` while the
//!    upstream is unhealthy.
//! 2. **Rate limiter**: refuse locally with [`ClientError::Throttled`] before
//!    the upstream quota is hit.
//! 3. **Retry**: back off and try again on network, timeout, server and
//!    upstream rate-limit errors.
//!
//! Every attempt and outcome is recorded to the shared telemetry collector.

mod client;
pub mod config;
pub mod error;
pub mod request;
pub mod transport;

pub use client::ApiClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use request::{ApiRequest, ApiResponse, Method};
pub use transport::{parse_retry_after, ReqwestTransport, Transport};
