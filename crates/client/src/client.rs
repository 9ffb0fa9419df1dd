//! Resilient request execution.
//!
//! Every attempt runs the same sequence: circuit-breaker permission, local
//! rate-limit admission, the transport call, then outcome bookkeeping. A
//! retryable failure sleeps for the strategy's delay and starts the sequence
//! again, so a breaker that trips mid-request stops the remaining retries.

use cache::CacheManager;
use resilience::{
    category, ApiError, CircuitBreaker, Classify, RateLimitError, RateLimiterManager,
    RetryStrategy, TelemetryCollector, TransportError,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::request::{ApiRequest, ApiResponse};
use crate::transport::Transport;

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiterManager>,
    retry: Arc<RetryStrategy>,
    telemetry: Arc<TelemetryCollector>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("breaker", &self.breaker.state())
            .field("retry", self.retry.config())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// A client with default resilience components of its own.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            breaker: Arc::new(CircuitBreaker::default()),
            limiter: Arc::new(RateLimiterManager::default()),
            retry: Arc::new(RetryStrategy::default()),
            telemetry: Arc::new(TelemetryCollector::default()),
        }
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiterManager>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_retry(mut self, retry: Arc<RetryStrategy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryCollector>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiterManager> {
        &self.limiter
    }

    pub fn telemetry(&self) -> &Arc<TelemetryCollector> {
        &self.telemetry
    }

    /// Sends `request`, retrying transient failures.
    ///
    /// Exhausted retries surface the last classified error. Cancelling
    /// `cancel` aborts the in-flight call or the pending retry sleep with an
    /// `UNKNOWN_ERROR` that is neither retried nor held against the breaker.
    pub async fn execute(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ClientError> {
        let endpoint = request.endpoint();
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                let err = cancelled(endpoint);
                self.on_failure(&err, attempt, started);
                return Err(err.into());
            }
            if self.breaker.is_open() {
                let err = ApiError::circuit_open(Some(endpoint));
                self.on_failure(&err, attempt, started);
                return Err(err.into());
            }
            if let Err(limited) = self.limiter.check_limit() {
                self.on_throttled(endpoint, &limited, attempt, started);
                return Err(limited.into());
            }

            self.telemetry.record(
                "request_attempt",
                category::API,
                json!({ "endpoint": endpoint, "attempt": attempt }),
            );

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                result = self.transport.send(request, cancel) => result,
            };

            let err = match outcome {
                Ok(response) => {
                    self.breaker.record_success();
                    self.on_success(endpoint, &response, attempt, started);
                    return Ok(response);
                }
                Err(TransportError::Cancelled) => {
                    let err = cancelled(endpoint);
                    self.on_failure(&err, attempt, started);
                    return Err(err.into());
                }
                Err(raw) => raw.classify(Some(endpoint)),
            };

            // Client errors and upstream throttling prove the upstream is up.
            if err.kind().indicates_unhealthy_upstream() {
                self.breaker.record_failure();
            } else {
                self.breaker.record_success();
            }

            let Some(delay) = self.retry.next_delay(&err, attempt) else {
                self.on_failure(&err, attempt, started);
                return Err(err.into());
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let err = cancelled(endpoint);
                    self.on_failure(&err, attempt, started);
                    return Err(err.into());
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt = attempt.saturating_add(1);
        }
    }

    /// GET `path` and deserialize the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<T, ClientError> {
        let request = query
            .iter()
            .fold(ApiRequest::get(path), |req, (k, v)| req.query(*k, v));
        let response = self.execute(&request, cancel).await?;
        decode(response, path)
    }

    /// Read-through: serve `key` from `cache`, or execute `request`, cache
    /// the decoded value under `key` for `ttl` with `dependencies`, and
    /// return it.
    pub async fn get_cached<T, I, S>(
        &self,
        cache: &CacheManager,
        key: &str,
        ttl: Duration,
        dependencies: I,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Some(hit) = cache.get::<T>(key) {
            return Ok(hit);
        }
        let response = self.execute(request, cancel).await?;
        let value: T = decode(response, request.endpoint())?;
        cache.set(key, value.clone(), ttl, dependencies);
        Ok(value)
    }

    fn on_success(&self, endpoint: &str, response: &ApiResponse, attempt: u32, started: Instant) {
        let duration_ms = elapsed_ms(started);
        tracing::debug!(endpoint, status = response.status, attempts = attempt + 1, duration_ms, "api request succeeded");
        self.telemetry.record(
            "request_success",
            category::API,
            json!({
                "endpoint": endpoint,
                "status": response.status,
                "attempts": attempt + 1,
                "duration_ms": duration_ms,
            }),
        );
        self.observe("success", started);
    }

    fn on_throttled(&self, endpoint: &str, limited: &RateLimitError, attempt: u32, started: Instant) {
        let duration_ms = elapsed_ms(started);
        let reset_in_ms = u64::try_from(limited.reset_in.as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(endpoint, attempt, reset_in_ms, "request throttled locally");
        self.telemetry.record(
            "request_throttled",
            category::API,
            json!({
                "endpoint": endpoint,
                "attempt": attempt,
                "bucket": limited.bucket,
                "remaining_requests": limited.remaining_requests,
                "reset_in_ms": reset_in_ms,
                "duration_ms": duration_ms,
            }),
        );
        self.observe("throttled", started);
    }

    fn on_failure(&self, err: &ApiError, attempt: u32, started: Instant) {
        let duration_ms = elapsed_ms(started);
        tracing::warn!(
            endpoint = err.endpoint().unwrap_or_default(),
            kind = %err.kind(),
            status = err.status_code(),
            attempts = attempt + 1,
            duration_ms,
            "api request failed"
        );
        self.telemetry.record(
            "request_failure",
            category::API,
            json!({
                "endpoint": err.endpoint(),
                "error_type": err.kind().as_str(),
                "status_code": err.status_code(),
                "message": err.message(),
                "attempts": attempt + 1,
                "duration_ms": duration_ms,
            }),
        );
        self.observe("failure", started);
    }

    #[cfg(feature = "metrics")]
    fn observe(&self, outcome: &'static str, started: Instant) {
        metrics::counter!("folio_api_requests_total", "outcome" => outcome).increment(1);
        metrics::histogram!("folio_api_request_duration_seconds")
            .record(started.elapsed().as_secs_f64());
    }

    #[cfg(not(feature = "metrics"))]
    fn observe(&self, _outcome: &'static str, _started: Instant) {}
}

fn cancelled(endpoint: &str) -> ApiError {
    TransportError::Cancelled.classify(Some(endpoint))
}

fn decode<T: DeserializeOwned>(response: ApiResponse, endpoint: &str) -> Result<T, ClientError> {
    serde_json::from_value(response.body)
        .map_err(|e| TransportError::Decode(e.to_string()).classify(Some(endpoint)).into())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
