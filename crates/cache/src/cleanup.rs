//! Periodic background cleanup of a [`CacheManager`].

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::store::CacheManager;

pub struct CacheCleanup {
    cache: Arc<CacheManager>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl CacheCleanup {
    /// Uses the cache's configured `cleanup_interval`.
    pub fn new(cache: Arc<CacheManager>) -> Self {
        let interval = cache.config().cleanup_interval;
        Self {
            cache,
            interval,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Spawns the cleanup loop on the current tokio runtime.
    ///
    /// The first pass runs one full interval after start. The loop ends when
    /// the token is cancelled or the returned handle is stopped or dropped.
    pub fn start(self) -> CleanupHandle {
        let period = self.interval.max(Duration::from_millis(1));
        info!(interval_ms = period.as_millis() as u64, "starting cache cleanup task");

        let shutdown = self.shutdown.clone();
        let cache = self.cache;
        let join = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("cache cleanup task: shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let report = cache.cleanup();
                        debug!(
                            expired = report.expired,
                            cascaded = report.cascaded,
                            orphans = report.orphans,
                            size = cache.len(),
                            "cache cleanup tick"
                        );
                    }
                }
            }
        });

        CleanupHandle {
            shutdown: self.shutdown,
            join: Some(join),
        }
    }
}

/// Owner of a running cleanup task. Dropping it cancels the task.
#[derive(Debug)]
pub struct CleanupHandle {
    shutdown: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl CleanupHandle {
    /// Cancels the task and waits for the loop to exit.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sweeps_expired_entries_each_interval() {
        let cache = Arc::new(CacheManager::default());
        cache.set("k", 1u32, Duration::from_millis(50), ["dep"]);

        let handle = CacheCleanup::new(cache.clone())
            .with_interval(Duration::from_millis(100))
            .start();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_token_stops_loop() {
        let cache = Arc::new(CacheManager::default());
        let token = CancellationToken::new();
        let handle = CacheCleanup::new(cache)
            .with_interval(Duration::from_millis(10))
            .with_cancellation(token.clone())
            .start();

        token.cancel();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_cancels() {
        let cache = Arc::new(CacheManager::default());
        let token = CancellationToken::new();
        let handle = CacheCleanup::new(cache)
            .with_cancellation(token.clone())
            .start();

        drop(handle);
        assert!(token.is_cancelled());
    }
}
