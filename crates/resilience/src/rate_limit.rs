//! Client-side request rate limiting.
//!
//! Keeps outbound traffic under the upstream quota with a fixed-window
//! counter. A window admits `max_requests` calls; the next call after the
//! window has elapsed starts a fresh one. There is no partial-window decay.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::lock_unpoisoned;
use crate::telemetry::{category, TelemetryCollector};

/// Bucket used by [`RateLimiterManager::check_limit`].
pub const DEFAULT_BUCKET: &str = "default";

/// Configuration for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Calls admitted per window.
    pub max_requests: u32,
    /// Window length in milliseconds.
    #[serde(with = "crate::serde_millis")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn with_max_requests(mut self, max: u32) -> Self {
        self.max_requests = max;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// The local quota is used up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("rate limit exceeded for bucket '{bucket}'; window resets in {reset_in:?}")]
pub struct RateLimitError {
    pub bucket: String,
    pub remaining_requests: u32,
    #[serde(rename = "reset_in_ms", with = "crate::serde_millis")]
    pub reset_in: Duration,
    pub reset_at: DateTime<Utc>,
}

/// Read-only view of a bucket's current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub bucket: String,
    pub max_requests: u32,
    pub remaining_requests: u32,
    #[serde(rename = "reset_in_ms", with = "crate::serde_millis")]
    pub reset_in: Duration,
    pub reset_at: DateTime<Utc>,
}

/// Lifetime counters of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateLimitStats {
    pub total_requests: u64,
    pub total_rejected: u64,
}

impl RateLimitStats {
    /// Calculate rejection rate (0.0 to 1.0).
    pub fn rejection_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_rejected as f64 / self.total_requests as f64
        }
    }
}

#[derive(Debug)]
struct Window {
    count: u32,
    start: Instant,
}

/// A single fixed-window counter.
#[derive(Debug)]
pub struct FixedWindow {
    config: RateLimitConfig,
    window: Mutex<Window>,
    total_requests: AtomicU64,
    total_rejected: AtomicU64,
}

impl FixedWindow {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window: Mutex::new(Window {
                count: 0,
                start: Instant::now(),
            }),
            total_requests: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Counts one call against the current window.
    ///
    /// On rejection returns the time left until the window resets. A rejected
    /// call still consumes the slot it asked for; it never becomes admissible
    /// later in the same window.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut window = lock_unpoisoned(&self.window);
        let now = Instant::now();
        if now.duration_since(window.start) >= self.config.window {
            window.count = 0;
            window.start = now;
        }
        window.count = window.count.saturating_add(1);
        if window.count > self.config.max_requests {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            let elapsed = now.duration_since(window.start);
            return Err(self.config.window.saturating_sub(elapsed));
        }
        Ok(())
    }

    /// `(remaining, reset_in)` without counting a call.
    pub fn remaining(&self) -> (u32, Duration) {
        let window = lock_unpoisoned(&self.window);
        let elapsed = Instant::now().duration_since(window.start);
        if elapsed >= self.config.window {
            return (self.config.max_requests, Duration::ZERO);
        }
        (
            self.config.max_requests.saturating_sub(window.count),
            self.config.window - elapsed,
        )
    }

    /// Starts a fresh window now.
    pub fn reset(&self) {
        let mut window = lock_unpoisoned(&self.window);
        window.count = 0;
        window.start = Instant::now();
    }

    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Owner of the process-wide limiter and any named buckets.
#[derive(Debug)]
pub struct RateLimiterManager {
    buckets: DashMap<String, Arc<FixedWindow>>,
    default_config: RateLimitConfig,
    telemetry: Option<Arc<TelemetryCollector>>,
}

impl RateLimiterManager {
    pub fn new(default_config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            default_config,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryCollector>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Gives `bucket` its own configuration instead of the default one.
    pub fn with_bucket_config(self, bucket: impl Into<String>, config: RateLimitConfig) -> Self {
        self.buckets
            .insert(bucket.into(), Arc::new(FixedWindow::new(config)));
        self
    }

    pub fn default_config(&self) -> &RateLimitConfig {
        &self.default_config
    }

    /// Get or create the counter for a bucket.
    pub fn get_or_create(&self, bucket: &str) -> Arc<FixedWindow> {
        if let Some(existing) = self.buckets.get(bucket) {
            return existing.clone();
        }
        self.buckets
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::new(FixedWindow::new(self.default_config)))
            .clone()
    }

    /// Admits one call against the default bucket.
    pub fn check_limit(&self) -> Result<(), RateLimitError> {
        self.check_limit_for(DEFAULT_BUCKET)
    }

    pub fn check_limit_for(&self, bucket: &str) -> Result<(), RateLimitError> {
        let window = self.get_or_create(bucket);
        let Err(reset_in) = window.try_acquire() else {
            return Ok(());
        };

        let err = RateLimitError {
            bucket: bucket.to_string(),
            remaining_requests: 0,
            reset_in,
            reset_at: reset_at(reset_in),
        };
        tracing::debug!(
            bucket,
            reset_in_ms = err.reset_in.as_millis() as u64,
            "local rate limit exceeded"
        );
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(
                "limit_exceeded",
                category::RATE_LIMIT,
                json!({
                    "bucket": bucket,
                    "max_requests": window.config().max_requests,
                    "reset_in_ms": err.reset_in.as_millis() as u64,
                }),
            );
        }
        Err(err)
    }

    /// Current window of the default bucket; never counts a call.
    pub fn info(&self) -> RateLimitInfo {
        self.info_for(DEFAULT_BUCKET)
    }

    pub fn info_for(&self, bucket: &str) -> RateLimitInfo {
        let window = self.get_or_create(bucket);
        let (remaining_requests, reset_in) = window.remaining();
        RateLimitInfo {
            bucket: bucket.to_string(),
            max_requests: window.config().max_requests,
            remaining_requests,
            reset_in,
            reset_at: reset_at(reset_in),
        }
    }

    /// Forces a fresh window on the default bucket.
    pub fn reset(&self) {
        self.reset_bucket(DEFAULT_BUCKET);
    }

    pub fn reset_bucket(&self, bucket: &str) {
        if let Some(window) = self.buckets.get(bucket) {
            window.reset();
        }
    }

    /// Fresh windows for every bucket; lifetime counters are kept.
    pub fn reset_all(&self) {
        for entry in self.buckets.iter() {
            entry.value().reset();
        }
    }

    /// Get stats for all buckets, sorted by name.
    pub fn all_stats(&self) -> Vec<(String, RateLimitStats)> {
        let mut stats: Vec<_> = self
            .buckets
            .iter()
            .map(|entry| {
                let (name, window) = entry.pair();
                (name.clone(), window.stats())
            })
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }
}

impl Default for RateLimiterManager {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

fn reset_at(reset_in: Duration) -> DateTime<Utc> {
    let delta = chrono::Duration::from_std(reset_in).unwrap_or(chrono::Duration::zero());
    Utc::now() + delta
}
