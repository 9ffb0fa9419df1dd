//! Bounded in-process event log.
//!
//! Every component that changes state reports it here. The collector is purely
//! observational: recording never fails, and a poisoned lock is recovered
//! rather than propagated, so losing telemetry can never change the outcome
//! of a request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::lock_unpoisoned;

pub const DEFAULT_CAPACITY: usize = 1000;

/// Category names used by the built-in producers.
pub mod category {
    pub const API: &str = "api";
    pub const BATCH: &str = "batch";
    pub const CACHE: &str = "cache";
    pub const CIRCUIT_BREAKER: &str = "circuit_breaker";
    pub const RATE_LIMIT: &str = "rate_limit";
    pub const RETRY: &str = "retry";
}

/// One recorded event. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub category: String,
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Percentiles over the `duration_ms` field of retained events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationPercentiles {
    pub count: usize,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// Aggregate view served to the observability endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub total_recorded: u64,
    pub retained: usize,
    pub dropped: u64,
    pub capacity: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durations: Option<DurationPercentiles>,
    pub recent: Vec<TelemetryEvent>,
}

#[derive(Debug)]
pub struct TelemetryCollector {
    capacity: usize,
    events: Mutex<VecDeque<TelemetryEvent>>,
    total_recorded: AtomicU64,
    dropped: AtomicU64,
}

impl TelemetryCollector {
    /// Creates a collector retaining at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            total_recorded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends an event, evicting the oldest one when full.
    ///
    /// `data` is stored as-is when it is a JSON object; any other value is
    /// wrapped as `{"value": data}`.
    pub fn record(&self, event_type: impl Into<String>, category: impl Into<String>, data: Value) {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let event = TelemetryEvent {
            event_type: event_type.into(),
            category: category.into(),
            data,
            timestamp: Utc::now(),
        };
        tracing::trace!(
            event_type = %event.event_type,
            category = %event.category,
            "telemetry event"
        );

        let mut events = lock_unpoisoned(&self.events);
        if events.len() >= self.capacity {
            events.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        events.push_back(event);
        self.total_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// All retained events, oldest first.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        lock_unpoisoned(&self.events).iter().cloned().collect()
    }

    pub fn events_by_category(&self, category: &str) -> Vec<TelemetryEvent> {
        lock_unpoisoned(&self.events)
            .iter()
            .filter(|e| e.category == category)
            .cloned()
            .collect()
    }

    pub fn events_by_type(&self, event_type: &str) -> Vec<TelemetryEvent> {
        lock_unpoisoned(&self.events)
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Count of retained events per event type.
    pub fn stats(&self) -> BTreeMap<String, usize> {
        let events = lock_unpoisoned(&self.events);
        let mut counts = BTreeMap::new();
        for event in events.iter() {
            *counts.entry(event.event_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops every retained event. Lifetime counters are kept.
    pub fn clear(&self) {
        lock_unpoisoned(&self.events).clear();
    }

    /// Builds the aggregate view, including the `recent` newest events.
    pub fn summary(&self, recent: usize) -> TelemetrySummary {
        let events = lock_unpoisoned(&self.events);

        let mut by_type = BTreeMap::new();
        let mut by_category = BTreeMap::new();
        let mut durations = Vec::new();
        for event in events.iter() {
            *by_type.entry(event.event_type.clone()).or_insert(0) += 1;
            *by_category.entry(event.category.clone()).or_insert(0) += 1;
            if let Some(ms) = event.data.get("duration_ms").and_then(Value::as_f64) {
                durations.push(ms);
            }
        }

        let skip = events.len().saturating_sub(recent);
        let recent_events = events.iter().skip(skip).cloned().collect();

        TelemetrySummary {
            total_recorded: self.total_recorded.load(Ordering::Relaxed),
            retained: events.len(),
            dropped: self.dropped.load(Ordering::Relaxed),
            capacity: self.capacity,
            by_type,
            by_category,
            durations: percentiles(durations),
            recent: recent_events,
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn percentiles(mut samples: Vec<f64>) -> Option<DurationPercentiles> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_by(|a, b| a.total_cmp(b));

    // Nearest-rank.
    let rank = |p: f64| {
        let idx = ((p / 100.0) * samples.len() as f64).ceil() as usize;
        samples[idx.saturating_sub(1).min(samples.len() - 1)]
    };

    Some(DurationPercentiles {
        count: samples.len(),
        p50_ms: rank(50.0),
        p90_ms: rank(90.0),
        p99_ms: rank(99.0),
        max_ms: samples[samples.len() - 1],
    })
}
