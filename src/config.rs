//! YAML configuration for a Folio deployment.
//!
//! One file configures every component. Sections that are left out fall
//! back to their defaults; durations are written in milliseconds.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! version: "1.0"
//! name: "blog front end"
//!
//! client:
//!   base_url: "https://cms.example.com/wp-json/wp/v2"
//!   timeout: 10000
//!
//! cache:
//!   default_ttl: 300000
//!   cleanup_interval: 60000
//!
//! circuit_breaker:
//!   failure_threshold: 5
//!   cool_down: 60000
//!
//! retry:
//!   max_attempts: 3
//!   base_delay: 1000
//!   max_delay: 30000
//!
//! rate_limit:
//!   max_requests: 60
//!   window: 60000
//!
//! telemetry:
//!   capacity: 1000
//! ```

use std::fs;
use std::path::Path;

use cache::CacheConfig;
use client::ClientConfig;
use resilience::{CircuitBreakerConfig, RateLimitConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FolioConfig {
    /// Configuration format version
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub telemetry: TelemetryYamlConfig,
}

impl FolioConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: FolioConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigLoadError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.client
            .validate()
            .map_err(|e| ConfigLoadError::Validation(e.to_string()))?;
        self.cache
            .validate()
            .map_err(|e| ConfigLoadError::Validation(e.to_string()))?;

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigLoadError::Validation(
                "circuit_breaker.failure_threshold must be >= 1".to_string(),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigLoadError::Validation(
                "retry.base_delay must not exceed retry.max_delay".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigLoadError::Validation(
                "retry.jitter_factor must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigLoadError::Validation(
                "rate_limit.max_requests must be >= 1".to_string(),
            ));
        }
        if self.rate_limit.window.is_zero() {
            return Err(ConfigLoadError::Validation(
                "rate_limit.window must be greater than 0".to_string(),
            ));
        }
        if self.telemetry.capacity == 0 {
            return Err(ConfigLoadError::Validation(
                "telemetry.capacity must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for FolioConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            name: None,
            client: ClientConfig::default(),
            cache: CacheConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            telemetry: TelemetryYamlConfig::default(),
        }
    }
}

/// Telemetry YAML configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryYamlConfig {
    /// Retained events; the oldest are dropped first.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for TelemetryYamlConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}
fn default_capacity() -> usize {
    resilience::telemetry::DEFAULT_CAPACITY
}
