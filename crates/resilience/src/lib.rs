//! Resilience primitives for calling an unreliable content API.
//!
//! - [`error`]: the [`ApiError`] taxonomy and the [`Classify`] boundary.
//! - [`circuit_breaker`]: fail fast while the upstream is unhealthy.
//! - [`retry`]: backoff-with-jitter retry policy.
//! - [`rate_limit`]: fixed-window client-side quota.
//! - [`telemetry`]: bounded in-process event log every component reports to.
//!
//! Every shared type here is `Send + Sync` and keeps its locks for short,
//! synchronous sections only; nothing holds a lock across an `.await`.

pub mod circuit_breaker;
pub mod error;
pub mod rate_limit;
pub mod retry;
pub mod serde_millis;
pub mod telemetry;

use std::sync::{Mutex, MutexGuard};

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use error::{classify, ApiError, ApiErrorKind, Classify, OriginalError, TransportError};
pub use rate_limit::{
    FixedWindow, RateLimitConfig, RateLimitError, RateLimitInfo, RateLimitStats,
    RateLimiterManager, DEFAULT_BUCKET,
};
pub use retry::{RetryConfig, RetryStrategy};
pub use telemetry::{
    category, DurationPercentiles, TelemetryCollector, TelemetryEvent, TelemetrySummary,
};

/// Locks `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
