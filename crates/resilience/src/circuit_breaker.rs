//! Circuit breaker for the upstream content API.
//!
//! The breaker stops calls to an upstream that keeps failing. After
//! `failure_threshold` consecutive failures it opens and every permission
//! check fails fast. Once `cool_down` has passed since the last failure, the
//! next check moves it to half-open and lets a trial call through; the trial's
//! outcome closes it again or re-opens it.
//!
//! ```text
//! Closed ──threshold failures──▶ Open ──cool_down elapsed──▶ HalfOpen
//!   ▲                             ▲                            │
//!   └──────────── success ────────┼──────────── failure ───────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::lock_unpoisoned;
use crate::telemetry::{category, TelemetryCollector};

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time after the last failure before a trial call is allowed.
    #[serde(with = "crate::serde_millis")]
    pub cool_down: Duration,
    /// Trial calls admitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }

    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }
}

/// States of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests allowed.
    Closed,
    /// Failing fast - requests immediately rejected.
    Open,
    /// Testing if the upstream recovered - limited requests allowed.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count_in_half_open: u32,
    pub failure_threshold: u32,
    #[serde(with = "crate::serde_millis")]
    pub cool_down: Duration,
    #[serde(with = "crate::serde_millis::option")]
    pub since_last_failure: Option<Duration>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    success_count_in_half_open: u32,
    half_open_calls: u32,
    half_open_since: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            success_count_in_half_open: 0,
            half_open_calls: 0,
            half_open_since: None,
        }
    }
}

type Transition = (CircuitState, CircuitState, u32);

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    telemetry: Option<Arc<TelemetryCollector>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState::closed()),
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryCollector>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. Never transitions; see [`is_open`](Self::is_open).
    pub fn state(&self) -> CircuitState {
        lock_unpoisoned(&self.inner).state
    }

    pub fn failure_count(&self) -> u32 {
        lock_unpoisoned(&self.inner).failure_count
    }

    /// Permission check made before every outbound call.
    ///
    /// Returns `true` when the caller must fail fast. An open breaker whose
    /// cool-down has elapsed moves to half-open here and admits the caller as
    /// its trial call.
    pub fn is_open(&self) -> bool {
        let (open, transition) = {
            let mut inner = lock_unpoisoned(&self.inner);
            match inner.state {
                CircuitState::Closed => (false, None),
                CircuitState::Open => {
                    let cooled = inner
                        .last_failure_time
                        .map_or(true, |at| at.elapsed() >= self.config.cool_down);
                    if cooled {
                        let t = Self::transition(&mut inner, CircuitState::HalfOpen);
                        inner.half_open_calls = 1;
                        (false, t)
                    } else {
                        (true, None)
                    }
                }
                CircuitState::HalfOpen => {
                    // A trial that never reported back (cancelled, throttled
                    // locally) must not wedge the breaker: its slot lapses
                    // after another cool-down.
                    let lapsed = inner
                        .half_open_since
                        .is_some_and(|at| at.elapsed() >= self.config.cool_down);
                    if lapsed {
                        inner.half_open_since = Some(Instant::now());
                        inner.half_open_calls = 0;
                    }
                    if inner.half_open_calls < self.config.half_open_max_calls.max(1) {
                        inner.half_open_calls += 1;
                        (false, None)
                    } else {
                        (true, None)
                    }
                }
            }
        };
        self.emit(transition, "cool_down_elapsed");
        open
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let transition = {
            let mut inner = lock_unpoisoned(&self.inner);
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.success_count_in_half_open += 1;
                    Self::transition(&mut inner, CircuitState::Closed)
                }
                // A call admitted before the trip finished late; the breaker
                // waits for its own trial instead.
                CircuitState::Open => None,
            }
        };
        self.emit(transition, "trial_succeeded");
    }

    /// Record a failed call that indicates upstream trouble.
    pub fn record_failure(&self) {
        let transition = {
            let mut inner = lock_unpoisoned(&self.inner);
            inner.failure_count = inner.failure_count.saturating_add(1);
            inner.last_failure_time = Some(Instant::now());
            match inner.state {
                CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                    Self::transition(&mut inner, CircuitState::Open)
                }
                CircuitState::HalfOpen => Self::transition(&mut inner, CircuitState::Open),
                _ => None,
            }
        };
        if let Some((_, CircuitState::Open, failures)) = transition {
            tracing::warn!(
                failures,
                cool_down_ms = self.config.cool_down.as_millis() as u64,
                "circuit breaker opened"
            );
        }
        self.emit(transition, "failure_threshold_reached");
    }

    /// Force the breaker closed and clear every counter.
    pub fn reset(&self) {
        let transition = {
            let mut inner = lock_unpoisoned(&self.inner);
            let from = inner.state;
            *inner = BreakerState::closed();
            (from != CircuitState::Closed).then_some((from, CircuitState::Closed, 0))
        };
        self.emit(transition, "reset");
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = lock_unpoisoned(&self.inner);
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count_in_half_open: inner.success_count_in_half_open,
            failure_threshold: self.config.failure_threshold,
            cool_down: self.config.cool_down,
            since_last_failure: inner.last_failure_time.map(|at| at.elapsed()),
        }
    }

    fn transition(inner: &mut BreakerState, to: CircuitState) -> Option<Transition> {
        let from = inner.state;
        if from == to {
            return None;
        }
        let failures = inner.failure_count;
        inner.state = to;
        match to {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count_in_half_open = 0;
                inner.half_open_calls = 0;
                inner.half_open_since = None;
            }
            CircuitState::HalfOpen => {
                inner.success_count_in_half_open = 0;
                inner.half_open_calls = 0;
                inner.half_open_since = Some(Instant::now());
            }
            CircuitState::Open => {
                inner.half_open_calls = 0;
                inner.half_open_since = None;
            }
        }
        Some((from, to, failures))
    }

    fn emit(&self, transition: Option<Transition>, reason: &str) {
        let Some((from, to, failures)) = transition else {
            return;
        };
        tracing::info!(from = %from, to = %to, reason, "circuit breaker state change");
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(
                "state_change",
                category::CIRCUIT_BREAKER,
                json!({
                    "from": from.as_str(),
                    "to": to.as_str(),
                    "failure_count": failures,
                    "reason": reason,
                }),
            );
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
