use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use folio::{AppContext, FolioConfig};
use http_body_util::BodyExt;
use serde_json::Value;
use server::{build_router, ServerConfig, ServerState};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const KEY: &str = "test-key";

fn setup(config: ServerConfig) -> (Router, Arc<AppContext>) {
    let ctx = Arc::new(AppContext::new(FolioConfig::default()).unwrap());
    let state = ServerState::with_context(config.with_api_key(KEY), ctx.clone());
    (build_router(Arc::new(state)), ctx)
}

fn app() -> (Router, Arc<AppContext>) {
    setup(ServerConfig::default())
}

fn authed(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", KEY)
        .body(Body::empty())
        .unwrap()
}

fn public(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

#[tokio::test]
async fn health_is_public() {
    let (app, _) = app();
    let (status, body) = send(&app, public("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn responses_carry_request_id() {
    let (app, _) = app();
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "abc-123")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "abc-123");
}

#[tokio::test]
async fn readiness_reflects_circuit_state() {
    let (app, ctx) = app();
    let (status, body) = send(&app, public("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["components"]["circuit"], "CLOSED");

    for _ in 0..5 {
        ctx.circuit_breaker().record_failure();
    }
    let (status, body) = send(&app, public("/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["components"]["circuit"], "OPEN");
}

#[tokio::test]
async fn metrics_unavailable_without_recorder() {
    let (app, _) = app();
    let (status, body) = send(&app, public("/metrics")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "UNAVAILABLE");
}

#[tokio::test]
async fn protected_routes_require_a_key() {
    let (app, _) = app();
    let (status, body) = send(&app, public("/api/v1/cache/stats")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTH_FAILED");

    let wrong = Request::builder()
        .uri("/api/v1/cache/stats")
        .header("authorization", "Bearer nope")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let bearer = Request::builder()
        .uri("/api/v1/cache/stats")
        .header("authorization", format!("Bearer {KEY}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, bearer).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn api_keys_are_rate_limited() {
    let (app, _) = setup(ServerConfig {
        rate_limit_per_minute: 2,
        ..ServerConfig::default()
    });
    for _ in 0..2 {
        let (status, _) = send(&app, authed("GET", "/api/v1/circuit")).await;
        assert_eq!(status, StatusCode::OK);
    }
    let response = app
        .clone()
        .oneshot(authed("GET", "/api/v1/circuit"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn admitted_requests_report_their_key_window() {
    let (app, _) = setup(ServerConfig {
        rate_limit_per_minute: 3,
        ..ServerConfig::default()
    });
    let response = app
        .clone()
        .oneshot(authed("GET", "/api/v1/circuit"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "2");
    assert!(response.headers()["x-ratelimit-reset"]
        .to_str()
        .unwrap()
        .parse::<u64>()
        .is_ok_and(|secs| secs <= 60));

    let response = app.oneshot(public("/health")).await.unwrap();
    assert!(!response.headers().contains_key("x-ratelimit-remaining"));
}

#[tokio::test]
async fn rate_limit_body_does_not_echo_the_key() {
    let (app, _) = setup(ServerConfig {
        rate_limit_per_minute: 1,
        ..ServerConfig::default()
    });
    let (status, _) = send(&app, authed("GET", "/api/v1/circuit")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, authed("GET", "/api/v1/circuit")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["details"]["remaining_requests"], 0);
    assert!(body["error"]["details"].get("bucket").is_none());
    assert!(!body.to_string().contains(KEY));
}

#[tokio::test]
async fn cache_stats_and_cascading_delete() {
    let (app, ctx) = app();
    let cache = ctx.cache();
    cache.set("media:7", 7u32, Duration::from_secs(60), Vec::<String>::new());
    cache.set("post:1", 1u32, Duration::from_secs(60), ["media:7"]);
    cache.set("post:2", 2u32, Duration::from_secs(60), ["post:1"]);
    let _ = cache.get::<u32>("post:1");

    let (status, body) = send(&app, authed("GET", "/api/v1/cache/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["size"], 3);
    assert_eq!(body["stats"]["hits"], 1);

    let (status, body) = send(&app, authed("DELETE", "/api/v1/cache/key/media:7")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 3);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn cache_pattern_and_clear() {
    let (app, ctx) = app();
    let cache = ctx.cache();
    for key in ["search:rust", "search:tokio", "post:1"] {
        cache.set(key, key.to_string(), Duration::from_secs(60), Vec::<String>::new());
    }

    let (status, body) = send(&app, authed("DELETE", "/api/v1/cache/keys/search:*")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 2);
    assert_eq!(cache.keys(), vec!["post:1".to_string()]);

    let (status, body) = send(&app, authed("DELETE", "/api/v1/cache")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn manual_cleanup_reports_nothing_on_fresh_cache() {
    let (app, ctx) = app();
    ctx.cache()
        .set("post:1", 1u32, Duration::from_secs(60), Vec::<String>::new());
    let (status, body) = send(&app, authed("POST", "/api/v1/cache/cleanup")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["expired"], 0);
    assert!(ctx.cache().contains("post:1"));
}

#[tokio::test]
async fn circuit_reset_closes_breaker() {
    let (app, ctx) = app();
    for _ in 0..5 {
        ctx.circuit_breaker().record_failure();
    }
    let (_, body) = send(&app, authed("GET", "/api/v1/circuit")).await;
    assert_eq!(body["state"], "OPEN");
    assert_eq!(body["failure_count"], 5);

    let (status, body) = send(&app, authed("POST", "/api/v1/circuit/reset")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "CLOSED");
    assert_eq!(body["failure_count"], 0);
}

#[tokio::test]
async fn rate_limit_status_and_reset() {
    let (app, ctx) = app();
    let limiter = ctx.rate_limiter();
    for _ in 0..3 {
        limiter.check_limit().unwrap();
    }

    let (status, body) = send(&app, authed("GET", "/api/v1/rate-limit")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current"]["remaining_requests"], 57);
    assert_eq!(body["buckets"]["default"]["stats"]["total_requests"], 3);

    let (status, body) = send(&app, authed("POST", "/api/v1/rate-limit/reset")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["remaining_requests"], 60);
}

#[tokio::test]
async fn telemetry_events_filter_and_clear() {
    let (app, ctx) = app();
    let telemetry = ctx.telemetry();
    telemetry.record("request_success", "api", serde_json::json!({ "duration_ms": 12 }));
    telemetry.record("cleanup", "cache", serde_json::json!({ "expired": 0 }));
    telemetry.record("request_failure", "api", serde_json::json!({ "duration_ms": 40 }));

    let (_, body) = send(&app, authed("GET", "/api/v1/telemetry/events?category=api")).await;
    assert_eq!(body["count"], 2);

    let (_, body) = send(
        &app,
        authed("GET", "/api/v1/telemetry/events?category=api&type=request_failure"),
    )
    .await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["events"][0]["type"], "request_failure");

    let (_, body) = send(&app, authed("GET", "/api/v1/telemetry/events?limit=1")).await;
    assert_eq!(body["events"][0]["type"], "request_failure");

    let (_, body) = send(&app, public("/telemetry?recent=2")).await;
    assert_eq!(body["total_recorded"], 3);
    assert_eq!(body["recent"].as_array().unwrap().len(), 2);

    let (status, body) = send(&app, authed("DELETE", "/api/v1/telemetry")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], 3);
    assert!(telemetry.is_empty());
}

#[tokio::test]
async fn unknown_routes_are_404() {
    let (app, _) = app();
    let (status, body) = send(&app, public("/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}
