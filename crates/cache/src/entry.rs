use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Type-erased cached value.
pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// One stored value with its lifetime. Graph edges live in the store.
#[derive(Clone)]
pub(crate) struct CacheEntry {
    pub value: Value,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(value: Value, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            inserted_at: now,
            ttl,
        }
    }

    /// Expired once `age >= ttl`; a zero TTL is expired on arrival.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }

    pub fn downcast<T: Clone + 'static>(&self) -> Option<T> {
        self.value.downcast_ref::<T>().cloned()
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("inserted_at", &self.inserted_at)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Instant::now();
        let entry = CacheEntry::new(Arc::new(1u32), Duration::from_millis(10), now);
        assert!(!entry.is_expired(now + Duration::from_millis(9)));
        assert!(entry.is_expired(now + Duration::from_millis(10)));
    }

    #[test]
    fn zero_ttl_is_expired_immediately() {
        let now = Instant::now();
        let entry = CacheEntry::new(Arc::new("x"), Duration::ZERO, now);
        assert!(entry.is_expired(now));
    }

    #[test]
    fn downcast_checks_type() {
        let entry = CacheEntry::new(Arc::new(7u64), Duration::from_secs(1), Instant::now());
        assert_eq!(entry.downcast::<u64>(), Some(7));
        assert_eq!(entry.downcast::<String>(), None);
    }
}
