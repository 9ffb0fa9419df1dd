use async_trait::async_trait;
use cache::CacheManager;
use client::{ApiClient, ApiRequest, ApiResponse, ClientError, Transport};
use resilience::{
    ApiErrorKind, CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimitConfig,
    RateLimiterManager, RetryConfig, RetryStrategy, TelemetryCollector, TransportError,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Replays a fixed script of outcomes; `Ok({})` once exhausted.
#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<ApiResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        _request: &ApiRequest,
        _cancel: &CancellationToken,
    ) -> Result<ApiResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ApiResponse::new(200, json!({}))))
    }
}

fn status(code: u16) -> Result<ApiResponse, TransportError> {
    Err(TransportError::Status {
        status: code,
        retry_after: None,
        body: None,
    })
}

fn ok(body: serde_json::Value) -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse::new(200, body))
}

struct Harness {
    transport: Arc<ScriptedTransport>,
    client: ApiClient,
    breaker: Arc<CircuitBreaker>,
    telemetry: Arc<TelemetryCollector>,
}

fn harness(script: Vec<Result<ApiResponse, TransportError>>, max_attempts: u32) -> Harness {
    let telemetry = Arc::new(TelemetryCollector::default());
    let breaker = Arc::new(
        CircuitBreaker::new(CircuitBreakerConfig::default()).with_telemetry(telemetry.clone()),
    );
    let retry = Arc::new(
        RetryStrategy::new(
            RetryConfig::default()
                .with_max_attempts(max_attempts)
                .with_jitter(false),
        )
        .with_telemetry(telemetry.clone()),
    );
    let transport = ScriptedTransport::new(script);
    let client = ApiClient::new(transport.clone())
        .with_circuit_breaker(breaker.clone())
        .with_retry(retry)
        .with_telemetry(telemetry.clone());
    Harness {
        transport,
        client,
        breaker,
        telemetry,
    }
}

#[tokio::test(start_paused = true)]
async fn retries_server_errors_until_success() {
    let h = harness(vec![status(503), status(502), ok(json!({"id": 1}))], 3);
    let started = tokio::time::Instant::now();

    let response = h
        .client
        .execute(&ApiRequest::get("/posts/1"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.body["id"], 1);
    assert_eq!(h.transport.calls(), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(1000 + 2000));
    assert_eq!(h.telemetry.events_by_type("retry_scheduled").len(), 2);
    assert_eq!(h.telemetry.events_by_type("request_attempt").len(), 3);
    assert_eq!(h.breaker.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_last_error() {
    let h = harness(vec![status(500), status(500), status(500), status(504)], 3);

    let err = h
        .client
        .execute(&ApiRequest::get("/posts"), &CancellationToken::new())
        .await
        .unwrap_err();

    let api = err.api_error().expect("api error");
    assert_eq!(api.kind(), ApiErrorKind::ServerError);
    assert_eq!(api.status_code(), Some(504));
    assert_eq!(api.endpoint(), Some("/posts"));
    assert_eq!(h.transport.calls(), 4);

    let failures = h.telemetry.events_by_type("request_failure");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].data["attempts"], 4);
}

#[tokio::test(start_paused = true)]
async fn client_errors_fail_immediately_and_keep_breaker_closed() {
    let h = harness(vec![status(404)], 3);

    let err = h
        .client
        .execute(&ApiRequest::get("/posts/999"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ApiErrorKind::ClientError));
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(h.breaker.failure_count(), 0);
    assert!(h.telemetry.events_by_type("retry_scheduled").is_empty());
}

#[tokio::test(start_paused = true)]
async fn open_breaker_fails_fast_without_transport_call() {
    let h = harness((0..5).map(|_| status(500)).collect(), 0);
    let cancel = CancellationToken::new();

    for _ in 0..5 {
        let err = h.client.execute(&ApiRequest::get("/posts"), &cancel).await.unwrap_err();
        assert_eq!(err.kind(), Some(ApiErrorKind::ServerError));
    }
    assert_eq!(h.breaker.state(), CircuitState::Open);

    let err = h.client.execute(&ApiRequest::get("/posts"), &cancel).await.unwrap_err();
    assert!(err.is_circuit_open());
    assert!(!err.api_error().unwrap().is_retryable());
    assert_eq!(h.transport.calls(), 5);
    assert_eq!(h.telemetry.events_by_type("state_change").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn breaker_recovers_after_cool_down() {
    let h = harness((0..5).map(|_| status(503)).collect(), 0);
    let cancel = CancellationToken::new();
    for _ in 0..5 {
        let _ = h.client.execute(&ApiRequest::get("/posts"), &cancel).await;
    }
    assert_eq!(h.breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(60)).await;
    let response = h.client.execute(&ApiRequest::get("/posts"), &cancel).await;
    assert!(response.is_ok());
    assert_eq!(h.breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn local_throttling_is_distinct_from_upstream_errors() {
    let transport = ScriptedTransport::new(vec![]);
    let limiter = Arc::new(RateLimiterManager::new(
        RateLimitConfig::default()
            .with_max_requests(2)
            .with_window(Duration::from_secs(60)),
    ));
    let telemetry = Arc::new(TelemetryCollector::default());
    let client = ApiClient::new(transport.clone())
        .with_rate_limiter(limiter)
        .with_telemetry(telemetry.clone());
    let cancel = CancellationToken::new();

    client.execute(&ApiRequest::get("/a"), &cancel).await.unwrap();
    client.execute(&ApiRequest::get("/b"), &cancel).await.unwrap();
    let err = client.execute(&ApiRequest::get("/c"), &cancel).await.unwrap_err();

    assert!(err.is_throttled());
    assert_eq!(err.kind(), None);
    match err {
        ClientError::Throttled(limit) => assert_eq!(limit.remaining_requests, 0),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(transport.calls(), 2);

    let throttled = telemetry.events_by_type("request_throttled");
    assert_eq!(throttled.len(), 1);
    assert_eq!(throttled[0].category, "api");
    assert_eq!(throttled[0].data["endpoint"], "/c");
    assert_eq!(throttled[0].data["remaining_requests"], 0);
    assert!(throttled[0].data["reset_in_ms"].as_u64().is_some_and(|ms| ms <= 60_000));
    assert!(telemetry.events_by_type("request_failure").is_empty());
}

#[tokio::test(start_paused = true)]
async fn upstream_retry_after_is_honoured() {
    let h = harness(
        vec![Err(TransportError::Status {
            status: 429,
            retry_after: Some(Duration::from_secs(7)),
            body: Some("slow down".into()),
        })],
        3,
    );
    let started = tokio::time::Instant::now();

    h.client
        .execute(&ApiRequest::get("/search"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(7));
    assert_eq!(h.breaker.failure_count(), 0);
    let retry = &h.telemetry.events_by_type("retry_scheduled")[0];
    assert_eq!(retry.data["error_type"], "RATE_LIMIT_ERROR");
    assert_eq!(retry.data["delay_ms"], 7000);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_retry_sleep() {
    let h = harness(vec![status(500)], 3);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let err = h
        .client
        .execute(&ApiRequest::get("/posts"), &cancel)
        .await
        .unwrap_err();

    let api = err.api_error().unwrap();
    assert_eq!(api.kind(), ApiErrorKind::UnknownError);
    assert_eq!(api.message(), "request cancelled");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(h.breaker.failure_count(), 1);
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Post {
    id: u64,
    title: String,
}

#[tokio::test(start_paused = true)]
async fn get_cached_reads_through_once() {
    let h = harness(vec![ok(json!({"id": 42, "title": "Hello"}))], 3);
    let cache = CacheManager::default();
    let cancel = CancellationToken::new();
    let request = ApiRequest::get("/posts/42");

    for _ in 0..3 {
        let post: Post = h
            .client
            .get_cached(&cache, "post:42", Duration::from_secs(60), ["media:7"], &request, &cancel)
            .await
            .unwrap();
        assert_eq!(post.title, "Hello");
    }
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(cache.stats().hits, 2);

    cache.delete("media:7");
    assert!(!cache.contains("post:42"));
}

#[tokio::test(start_paused = true)]
async fn get_json_reports_undecodable_bodies_as_unknown() {
    let h = harness(vec![ok(json!({"unexpected": true}))], 3);

    let err = h
        .client
        .get_json::<Post>("/posts/1", &[("context", "view")], &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ApiErrorKind::UnknownError));
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn success_is_recorded_with_duration() {
    let h = harness(vec![], 3);
    h.client
        .execute(&ApiRequest::get("/posts"), &CancellationToken::new())
        .await
        .unwrap();

    let events = h.telemetry.events_by_type("request_success");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].data["endpoint"], "/posts");
    assert!(events[0].data["duration_ms"].is_u64());
    assert!(h.telemetry.summary(0).durations.is_some());
}
