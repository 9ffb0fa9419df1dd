use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use folio::{AppContext, FolioConfig, RateLimitConfig, RateLimitError, RateLimiterManager};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared application state
#[derive(Clone)]
pub struct ServerState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    /// The Folio components this server observes and administers
    pub ctx: Arc<AppContext>,

    /// One fixed window per API key, separate from the upstream limiter
    pub key_limiter: Arc<RateLimiterManager>,

    /// Renders the Prometheus exposition; `None` when metrics are off
    pub prometheus: Option<PrometheusHandle>,

    pub started_at: Instant,
}

impl ServerState {
    /// Build the Folio context from `config.folio_config` (or defaults) and
    /// install the Prometheus recorder when enabled.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let folio_config = match &config.folio_config {
            Some(path) => FolioConfig::from_file(path).map_err(folio::FolioError::from)?,
            None => FolioConfig::default(),
        };
        let ctx = Arc::new(AppContext::new(folio_config)?);

        let prometheus = if config.metrics_enabled {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| ServerError::Config(format!("prometheus recorder: {e}")))?;
            Some(handle)
        } else {
            None
        };

        Ok(Self::with_context(config, ctx).with_prometheus(prometheus))
    }

    /// State around an existing context, without a metrics recorder.
    pub fn with_context(config: ServerConfig, ctx: Arc<AppContext>) -> Self {
        let key_limiter = RateLimiterManager::new(
            RateLimitConfig::default()
                .with_max_requests(config.rate_limit_per_minute.max(1))
                .with_window(Duration::from_secs(60)),
        );

        Self {
            config: Arc::new(config),
            ctx,
            key_limiter: Arc::new(key_limiter),
            prometheus: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_prometheus(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.prometheus = handle;
        self
    }

    /// Check if API key is valid
    pub fn is_valid_api_key(&self, key: &str) -> bool {
        self.config.api_keys.contains(key)
    }

    /// Count one request against `key`'s window.
    pub fn check_rate_limit(&self, key: &str) -> Result<(), RateLimitError> {
        self.key_limiter.check_limit_for(key)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Server metadata for health checks
#[derive(Debug, serde::Serialize)]
pub struct ServerMetadata {
    pub version: String,
    pub uptime_seconds: u64,
}
