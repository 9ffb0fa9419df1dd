//! Dependency-aware TTL cache.
//!
//! Entries may declare the keys they were derived from. Removing a key, by
//! explicit delete or by expiry, removes every entry that depends on it,
//! transitively. The graph is kept in two adjacency maps next to the entry
//! map, so a dependency can be tracked before (or without) being cached.
//!
//! All state sits behind one mutex and every operation is a single
//! synchronous critical section. That makes the cleanup task safe to run
//! alongside request-path reads and writes.

use regex::Regex;
use resilience::telemetry::{category, TelemetryCollector};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::stats::{CacheStats, CleanupReport, Counters};

type Graph = HashMap<String, HashSet<String>>;

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// key -> keys it depends on
    dependencies: Graph,
    /// key -> keys depending on it
    dependents: Graph,
    counters: Counters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    Delete,
    Expired,
}

impl Removal {
    fn as_str(self) -> &'static str {
        match self {
            Removal::Delete => "delete",
            Removal::Expired => "expired",
        }
    }
}

enum Lookup<T> {
    Missing,
    Expired,
    Found(Option<T>),
}

/// Result of removing one key with its dependents.
#[derive(Debug, Default, Clone, Copy)]
struct Cascade {
    root_removed: bool,
    cascaded: usize,
}

impl Cascade {
    fn removed(&self) -> usize {
        usize::from(self.root_removed) + self.cascaded
    }
}

impl CacheState {
    fn is_live(&self, key: &str, now: Instant) -> bool {
        self.entries.get(key).is_some_and(|e| !e.is_expired(now))
    }

    /// Removes `root` and everything reachable through its dependents.
    ///
    /// The visited set guarantees termination on cycles and that each key is
    /// removed once.
    fn remove_cascade(&mut self, root: &str, reason: Removal) -> Cascade {
        let mut result = Cascade::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack = vec![root.to_string()];

        while let Some(key) = stack.pop() {
            if !visited.insert(key.clone()) {
                continue;
            }

            let existed = self.entries.remove(&key).is_some();
            if key == root {
                result.root_removed = existed;
                if existed && reason == Removal::Expired {
                    self.counters.expirations += 1;
                }
            } else if existed {
                result.cascaded += 1;
                self.counters.cascade_invalidations += 1;
            }

            if let Some(dependents) = self.dependents.remove(&key) {
                stack.extend(dependents.into_iter().filter(|d| !visited.contains(d)));
            }
            self.unlink_dependencies(&key);
        }
        result
    }

    /// Drops the outgoing edges of `key` and the matching reverse edges.
    fn unlink_dependencies(&mut self, key: &str) {
        let Some(deps) = self.dependencies.remove(key) else {
            return;
        };
        for dep in deps {
            remove_edge(&mut self.dependents, &dep, key);
        }
    }

    /// Edges that lost their owner or their mirror in the other map.
    ///
    /// An edge `key -> dep` is live while `key` is cached and both maps
    /// record it. Whether `dep` itself is cached does not matter.
    fn stale_edges(&self) -> HashSet<(String, String)> {
        let mut stale = HashSet::new();
        for (key, deps) in &self.dependencies {
            let owned = self.entries.contains_key(key);
            for dep in deps {
                let mirrored = self.dependents.get(dep).is_some_and(|d| d.contains(key));
                if !owned || !mirrored {
                    stale.insert((key.clone(), dep.clone()));
                }
            }
        }
        for (dep, dependents) in &self.dependents {
            for key in dependents {
                let mirrored = self.dependencies.get(key).is_some_and(|d| d.contains(dep));
                if !mirrored || !self.entries.contains_key(key) {
                    stale.insert((key.clone(), dep.clone()));
                }
            }
        }
        stale
    }

    fn link(&mut self, key: &str, dep: &str) -> bool {
        let created = self
            .dependencies
            .entry(key.to_string())
            .or_default()
            .insert(dep.to_string());
        self.dependents
            .entry(dep.to_string())
            .or_default()
            .insert(key.to_string());
        created
    }
}

fn remove_edge(graph: &mut Graph, from: &str, to: &str) {
    if let Some(set) = graph.get_mut(from) {
        set.remove(to);
        if set.is_empty() {
            graph.remove(from);
        }
    }
}

/// Translates a `*`/`?` glob into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, CacheError> {
    let escaped = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{escaped}$")).map_err(|source| CacheError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// In-process cache shared by every data-fetching call site.
#[derive(Debug)]
pub struct CacheManager {
    config: CacheConfig,
    state: Mutex<CacheState>,
    telemetry: Option<Arc<TelemetryCollector>>,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryCollector>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Looks up `key`.
    ///
    /// Expired entries are evicted here, with cascade, and reported as a
    /// miss. A stored value of another type than `T` is also a miss.
    pub fn get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let (value, evicted) = {
            let mut state = self.lock();
            let lookup = match state.entries.get(key) {
                None => Lookup::Missing,
                Some(entry) if entry.is_expired(now) => Lookup::Expired,
                Some(entry) => Lookup::Found(entry.downcast::<T>()),
            };
            match lookup {
                Lookup::Found(Some(value)) => {
                    state.counters.hits += 1;
                    (Some(value), None)
                }
                Lookup::Found(None) | Lookup::Missing => {
                    state.counters.misses += 1;
                    (None, None)
                }
                Lookup::Expired => {
                    let cascade = state.remove_cascade(key, Removal::Expired);
                    state.counters.misses += 1;
                    (None, Some(cascade))
                }
            }
        };
        if let Some(cascade) = evicted {
            self.report_cascade(key, Removal::Expired, cascade);
        }
        value
    }

    /// Stores `value` under `key` for `ttl`, depending on `dependencies`.
    ///
    /// Replacing a key re-derives its outgoing edges; keys that depend on it
    /// keep depending on it. Dependencies that are not cached are tracked as
    /// graph nodes only.
    pub fn set<T, I, S>(&self, key: &str, value: T, ttl: Duration, dependencies: I)
    where
        T: Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entry = CacheEntry::new(Arc::new(value), ttl, Instant::now());
        let mut state = self.lock();

        let previous = state.dependencies.get(key).cloned().unwrap_or_default();
        state.unlink_dependencies(key);
        state.entries.insert(key.to_string(), entry);

        let mut registered = 0u64;
        for dep in dependencies {
            let dep = dep.as_ref();
            if dep == key {
                continue;
            }
            if state.link(key, dep) && !previous.contains(dep) {
                registered += 1;
            }
        }
        state.counters.dependency_registrations += registered;
    }

    /// [`set`](Self::set) with the configured default TTL.
    pub fn set_default<T, I, S>(&self, key: &str, value: T, dependencies: I)
    where
        T: Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.set(key, value, self.config.default_ttl, dependencies);
    }

    /// Removes `key` and, transitively, everything depending on it.
    ///
    /// Works for uncached dependency keys too. Returns the number of cached
    /// entries removed.
    pub fn delete(&self, key: &str) -> usize {
        let cascade = self.lock().remove_cascade(key, Removal::Delete);
        self.report_cascade(key, Removal::Delete, cascade);
        cascade.removed()
    }

    /// Deletes, with cascade, every cached key matching `pattern`.
    ///
    /// `*` matches any run of characters and `?` exactly one; the pattern
    /// must match the whole key.
    pub fn clear_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let regex = glob_to_regex(pattern)?;
        let mut cascades = Vec::new();
        {
            let mut state = self.lock();
            let matching: Vec<String> = state
                .entries
                .keys()
                .filter(|k| regex.is_match(k))
                .cloned()
                .collect();
            for key in matching {
                if !state.entries.contains_key(&key) {
                    continue;
                }
                let cascade = state.remove_cascade(&key, Removal::Delete);
                cascades.push((key, cascade));
            }
        }

        let mut removed = 0;
        for (key, cascade) in cascades {
            removed += cascade.removed();
            self.report_cascade(&key, Removal::Delete, cascade);
        }
        tracing::debug!(pattern, removed, "cleared cache keys by pattern");
        Ok(removed)
    }

    /// Removes every entry and graph edge. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.dependencies.clear();
        state.dependents.clear();
    }

    /// Sweeps expired entries, then prunes stale dependency references.
    ///
    /// Expiry runs first so that its cascades are visible to the pruning
    /// pass. A dependency that was never cached is still a graph node and
    /// keeps its edges, so deleting it later cascades. Pruning only ever
    /// drops references, never the entry holding them.
    pub fn cleanup(&self) -> CleanupReport {
        let now = Instant::now();
        let mut report = CleanupReport::default();
        {
            let mut state = self.lock();

            let expired: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired {
                if !state.entries.contains_key(&key) {
                    continue;
                }
                let cascade = state.remove_cascade(&key, Removal::Expired);
                report.expired += usize::from(cascade.root_removed);
                report.cascaded += cascade.cascaded;
            }

            let stale = state.stale_edges();
            for (key, dep) in &stale {
                remove_edge(&mut state.dependencies, key, dep);
                remove_edge(&mut state.dependents, dep, key);
            }
            report.orphans = stale.len();
        }

        if !report.is_empty() {
            tracing::debug!(
                expired = report.expired,
                cascaded = report.cascaded,
                orphans = report.orphans,
                "cache cleanup pass"
            );
            if let Some(telemetry) = &self.telemetry {
                telemetry.record(
                    "cleanup",
                    category::CACHE,
                    json!({
                        "expired": report.expired,
                        "cascaded": report.cascaded,
                        "orphans": report.orphans,
                    }),
                );
            }
        }
        report
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        state.counters.snapshot(state.entries.len())
    }

    /// Whether `key` holds an unexpired entry. Does not touch the counters.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().is_live(key, Instant::now())
    }

    /// Unexpired keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let state = self.lock();
        let mut keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys that directly depend on `key`, sorted.
    pub fn dependents_of(&self, key: &str) -> Vec<String> {
        sorted(self.lock().dependents.get(key))
    }

    /// Keys `key` directly depends on, sorted.
    pub fn dependencies_of(&self, key: &str) -> Vec<String> {
        sorted(self.lock().dependencies.get(key))
    }

    fn report_cascade(&self, root: &str, reason: Removal, cascade: Cascade) {
        if cascade.cascaded == 0 {
            return;
        }
        tracing::debug!(
            root,
            reason = reason.as_str(),
            cascaded = cascade.cascaded,
            "cascade invalidation"
        );
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(
                "cascade_invalidation",
                category::CACHE,
                json!({
                    "root": root,
                    "reason": reason.as_str(),
                    "cascaded": cascade.cascaded,
                }),
            );
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

fn sorted(set: Option<&HashSet<String>>) -> Vec<String> {
    let mut keys: Vec<String> = set.map(|s| s.iter().cloned().collect()).unwrap_or_default();
    keys.sort();
    keys
}
