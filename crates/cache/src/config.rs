//! Configuration for the cache and its cleanup task.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CacheError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL used by [`CacheManager::set_default`](crate::CacheManager::set_default).
    #[serde(with = "resilience::serde_millis")]
    pub default_ttl: Duration,
    /// Period of the background cleanup pass.
    #[serde(with = "resilience::serde_millis")]
    pub cleanup_interval: Duration,
    /// Whether the application starts the cleanup task at all.
    pub enable_auto_cleanup: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60),
            enable_auto_cleanup: true,
        }
    }
}

impl CacheConfig {
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = enable;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.enable_auto_cleanup && self.cleanup_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "cleanup_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
