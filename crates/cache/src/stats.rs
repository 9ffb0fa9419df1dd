use serde::{Deserialize, Serialize};

/// Cache counters plus current size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0.0 before the first lookup.
    pub hit_rate: f64,
    /// Stored entries, expired-but-unswept ones included.
    pub size: usize,
    /// Entries removed because something they depend on went away.
    pub cascade_invalidations: u64,
    /// Dependency edges created by `set`.
    pub dependency_registrations: u64,
    /// Entries removed for reaching their TTL.
    pub expirations: u64,
}

/// Outcome of one [`CacheManager::cleanup`](crate::CacheManager::cleanup) pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Entries removed because their TTL elapsed.
    pub expired: usize,
    /// Dangling graph edges pruned. Edges to never-cached keys are kept.
    pub orphans: usize,
    /// Entries removed by cascades started from expired ones.
    pub cascaded: usize,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.expired == 0 && self.orphans == 0 && self.cascaded == 0
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub hits: u64,
    pub misses: u64,
    pub cascade_invalidations: u64,
    pub dependency_registrations: u64,
    pub expirations: u64,
}

impl Counters {
    pub fn snapshot(&self, size: usize) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
            size,
            cascade_invalidations: self.cascade_invalidations,
            dependency_registrations: self.dependency_registrations,
            expirations: self.expirations,
        }
    }
}
