//! Workspace umbrella crate for Folio, a resilient content-API access layer.
//!
//! [`AppContext`] owns exactly one instance of each stateful component
//! (telemetry, cache, circuit breaker, rate limiter, retry policy) and the
//! [`ApiClient`] wired to them. Call sites receive the context, or clones of
//! its `Arc`s, instead of reaching for process-wide statics.
//!
//! ```ignore
//! let ctx = folio::AppContext::new(folio::FolioConfig::from_file("folio.yaml")?)?;
//! ctx.start_background_tasks();
//!
//! let post: Post = ctx
//!     .client()
//!     .get_cached(ctx.cache(), "post:42", ttl, ["media:7"], &ApiRequest::get("/posts/42"), &cancel)
//!     .await?;
//!
//! ctx.shutdown().await;
//! ```

pub mod config;

pub use cache::{
    BatchOperation, BatchOperationExecutor, BatchResult, CacheCleanup, CacheConfig, CacheError,
    CacheManager, CacheStats, CleanupHandle, CleanupReport,
};
pub use client::{
    ApiClient, ApiRequest, ApiResponse, ClientConfig, ClientError, Method, ReqwestTransport,
    Transport,
};
pub use config::{ConfigLoadError, FolioConfig, TelemetryYamlConfig};
pub use resilience::{
    category, ApiError, ApiErrorKind, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot,
    CircuitState, Classify, RateLimitConfig, RateLimitError, RateLimitInfo, RateLimiterManager,
    RetryConfig, RetryStrategy, TelemetryCollector, TelemetryEvent, TelemetrySummary,
    TransportError,
};

use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Errors raised while assembling an [`AppContext`].
#[derive(Debug)]
pub enum FolioError {
    Config(ConfigLoadError),
    Client(ClientError),
}

impl fmt::Display for FolioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FolioError::Config(err) => write!(f, "configuration failure: {err}"),
            FolioError::Client(err) => write!(f, "client setup failure: {err}"),
        }
    }
}

impl Error for FolioError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FolioError::Config(err) => Some(err),
            FolioError::Client(err) => Some(err),
        }
    }
}

impl From<ConfigLoadError> for FolioError {
    fn from(value: ConfigLoadError) -> Self {
        FolioError::Config(value)
    }
}

impl From<ClientError> for FolioError {
    fn from(value: ClientError) -> Self {
        FolioError::Client(value)
    }
}

/// Owner of the shared components.
pub struct AppContext {
    config: FolioConfig,
    telemetry: Arc<TelemetryCollector>,
    cache: Arc<CacheManager>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiterManager>,
    client: ApiClient,
    batch: BatchOperationExecutor,
    shutdown: CancellationToken,
    cleanup: Mutex<Option<CleanupHandle>>,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("cache_size", &self.cache.len())
            .field("circuit", &self.breaker.state())
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Builds every component from `config` with a [`ReqwestTransport`].
    pub fn new(config: FolioConfig) -> Result<Self, FolioError> {
        config.validate()?;
        let transport = Arc::new(ReqwestTransport::new(&config.client)?);
        Self::with_transport(config, transport)
    }

    /// Like [`new`](Self::new) with a caller-supplied transport.
    pub fn with_transport(
        config: FolioConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, FolioError> {
        config.validate()?;

        let telemetry = Arc::new(TelemetryCollector::new(config.telemetry.capacity));
        let cache = Arc::new(CacheManager::new(config.cache).with_telemetry(telemetry.clone()));
        let breaker = Arc::new(
            CircuitBreaker::new(config.circuit_breaker).with_telemetry(telemetry.clone()),
        );
        let limiter = Arc::new(
            RateLimiterManager::new(config.rate_limit).with_telemetry(telemetry.clone()),
        );
        let retry = Arc::new(RetryStrategy::new(config.retry).with_telemetry(telemetry.clone()));

        let client = ApiClient::new(transport)
            .with_circuit_breaker(breaker.clone())
            .with_rate_limiter(limiter.clone())
            .with_retry(retry)
            .with_telemetry(telemetry.clone());
        let batch = BatchOperationExecutor::new(cache.clone()).with_telemetry(telemetry.clone());

        tracing::info!(
            base_url = %config.client.base_url,
            failure_threshold = config.circuit_breaker.failure_threshold,
            max_requests = config.rate_limit.max_requests,
            "folio context ready"
        );

        Ok(Self {
            config,
            telemetry,
            cache,
            breaker,
            limiter,
            client,
            batch,
            shutdown: CancellationToken::new(),
            cleanup: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &FolioConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<TelemetryCollector> {
        &self.telemetry
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiterManager> {
        &self.limiter
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn batch(&self) -> &BatchOperationExecutor {
        &self.batch
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Starts the periodic cache cleanup, once. Must run inside a tokio
    /// runtime. Returns whether a task was started.
    pub fn start_background_tasks(&self) -> bool {
        if !self.config.cache.enable_auto_cleanup || self.shutdown.is_cancelled() {
            return false;
        }
        let mut slot = self
            .cleanup
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return false;
        }
        let handle = CacheCleanup::new(self.cache.clone())
            .with_cancellation(self.shutdown.child_token())
            .start();
        *slot = Some(handle);
        true
    }

    /// Cancels the shutdown token and waits for background tasks to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .cleanup
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
        tracing::info!("folio context shut down");
    }
}
