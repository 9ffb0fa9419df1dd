//! Retry policy with exponential backoff for transient API failures.
//!
//! The strategy only answers two questions, whether a classified failure
//! deserves another attempt and how long to wait first. The client owns the
//! loop and the sleep so that cancellation can interrupt both.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ApiError, ApiErrorKind};
use crate::telemetry::{category, TelemetryCollector};

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on every later one.
    #[serde(with = "crate::serde_millis")]
    pub base_delay: Duration,
    /// Upper bound for any computed delay.
    #[serde(with = "crate::serde_millis")]
    pub max_delay: Duration,
    /// Whether to spread delays randomly around the computed value.
    pub jitter: bool,
    /// Relative jitter width; 0.5 spreads a delay over ±50 %.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter: true,
            jitter_factor: 0.5,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }
}

#[derive(Debug, Default)]
pub struct RetryStrategy {
    config: RetryConfig,
    telemetry: Option<Arc<TelemetryCollector>>,
}

impl RetryStrategy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryCollector>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether the attempt with zero-based index `attempt`, which failed with
    /// `error`, should be followed by another one.
    pub fn should_retry(&self, error: &ApiError, attempt: u32) -> bool {
        if attempt >= self.config.max_attempts {
            return false;
        }
        error.kind().is_retryable()
    }

    /// Delay before retrying after attempt `attempt` failed with `error`.
    ///
    /// A rate-limit error carrying an upstream `Retry-After` hint is honoured
    /// verbatim. Everything else backs off exponentially from `base_delay`,
    /// jittered and clamped into `[base_delay, max_delay]`.
    pub fn retry_delay(&self, attempt: u32, error: &ApiError) -> Duration {
        if error.kind() == ApiErrorKind::RateLimitError {
            if let Some(hint) = error.retry_after() {
                return hint;
            }
        }
        let delay = self.base_delay_for(attempt);
        if !self.config.jitter || self.config.jitter_factor <= 0.0 {
            return delay;
        }

        let spread = delay.as_secs_f64() * self.config.jitter_factor;
        let offset = (fastrand::f64() * 2.0 - 1.0) * spread;
        let jittered = (delay.as_secs_f64() + offset).max(0.0);
        let floor = self.config.base_delay.min(self.config.max_delay);
        Duration::from_secs_f64(jittered).clamp(floor, self.config.max_delay)
    }

    /// Un-jittered backoff: `min(max_delay, base_delay * 2^attempt)`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.config
            .base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.config.max_delay)
    }

    /// Combined retry decision used by the client loop.
    ///
    /// Returns the delay to sleep before the next attempt, or `None` when the
    /// failure is final. A scheduled retry is logged and recorded.
    pub fn next_delay(&self, error: &ApiError, attempt: u32) -> Option<Duration> {
        if !self.should_retry(error, attempt) {
            return None;
        }
        let delay = self.retry_delay(attempt, error);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);

        tracing::warn!(
            attempt,
            delay_ms,
            kind = %error.kind(),
            endpoint = error.endpoint().unwrap_or_default(),
            "retrying api request"
        );
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(
                "retry_scheduled",
                category::RETRY,
                json!({
                    "attempt": attempt,
                    "delay_ms": delay_ms,
                    "error_type": error.kind().as_str(),
                    "endpoint": error.endpoint(),
                }),
            );
        }
        Some(delay)
    }
}
