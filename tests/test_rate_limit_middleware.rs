//! Tests for the rate limiting middleware
//!
//! These tests drive axum routers through `oneshot` and check the response
//! contract: quota headers, rejection body, and which outcomes are counted.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower::ServiceExt;
use turnstile::http::{rate_limit_middleware, AuthenticatedUser, RateLimitState};
use turnstile::ratelimit::{Preset, RateLimitOptions, RateLimitStore, RateLimiter};

/// Login handler: succeeds only for the `good` password
async fn login_handler(request: Request) -> StatusCode {
    match request.headers().get("x-password").and_then(|h| h.to_str().ok()) {
        Some("good") => StatusCode::OK,
        _ => StatusCode::UNAUTHORIZED,
    }
}

async fn ok_handler() -> &'static str {
    "ok"
}

async fn slow_handler() -> &'static str {
    tokio::time::sleep(Duration::from_secs(10)).await;
    "done"
}

/// Stand-in for upstream authentication: trusts the `x-user-id` header
async fn fake_auth(mut request: Request, next: Next) -> Response {
    if let Some(user) = request
        .headers()
        .get("x-user-id")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
    {
        request.extensions_mut().insert(AuthenticatedUser(user));
    }
    next.run(request).await
}

fn limited_router(state: RateLimitState) -> Router {
    Router::new()
        .route("/test", get(ok_handler))
        .route("/login", post(login_handler))
        .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
}

fn get_from(ip: &str) -> Request {
    axum::http::Request::builder()
        .uri("/test")
        .header("x-forwarded-for", ip)
        .body(Body::empty())
        .unwrap()
}

fn login_from(ip: &str, password: &str) -> Request {
    axum::http::Request::builder()
        .method("POST")
        .uri("/login")
        .header("x-forwarded-for", ip)
        .header("x-password", password)
        .body(Body::empty())
        .unwrap()
}

fn small_limit(store: Arc<RateLimitStore>, max_requests: i64) -> RateLimitState {
    let options = RateLimitOptions {
        window_ms: Some(60_000),
        max_requests: Some(max_requests),
        ..Default::default()
    };
    RateLimitState::new(RateLimiter::new(options, store))
}

#[tokio::test]
async fn test_admitted_requests_carry_quota_headers() {
    let router = limited_router(small_limit(Arc::new(RateLimitStore::new()), 3));

    let response = router.clone().oneshot(get_from("1.2.3.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "3");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "2");

    let reset = response.headers()["x-ratelimit-reset"].to_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(reset).is_ok());
    assert!(reset.ends_with('Z'));

    let response = router.oneshot(get_from("1.2.3.4")).await.unwrap();
    assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
}

#[tokio::test]
async fn test_rejection_contract() {
    let router = limited_router(small_limit(Arc::new(RateLimitStore::new()), 2));

    for _ in 0..2 {
        let response = router.clone().oneshot(get_from("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router.oneshot(get_from("1.2.3.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-limit"], "2");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    assert!(response.headers().contains_key("x-ratelimit-reset"));

    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let body = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "Too many requests, please try again later.");
    assert_eq!(json["retryAfter"], retry_after);
}

#[tokio::test]
async fn test_configured_status_code() {
    let options = RateLimitOptions {
        max_requests: Some(1),
        status_code: Some(503),
        message: Some("Busy".to_string()),
        ..Default::default()
    };
    let store = Arc::new(RateLimitStore::new());
    let router = limited_router(RateLimitState::new(RateLimiter::new(options, store)));

    router.clone().oneshot(get_from("1.2.3.4")).await.unwrap();
    let response = router.oneshot(get_from("1.2.3.4")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "Busy");
}

#[tokio::test]
async fn test_addresses_are_isolated() {
    let router = limited_router(small_limit(Arc::new(RateLimitStore::new()), 1));

    let response = router.clone().oneshot(get_from("10.0.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = router.clone().oneshot(get_from("10.0.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = router.oneshot(get_from("10.0.0.2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_auth_preset_counts_only_failures() {
    let store = Arc::new(RateLimitStore::new());
    let router = limited_router(RateLimitState::preset(Preset::Auth, store.clone()));
    let ip = "203.0.113.9";

    for _ in 0..4 {
        let response = router.clone().oneshot(login_from(ip, "bad")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // Successful logins pass through without using quota
    for _ in 0..3 {
        let response = router.clone().oneshot(login_from(ip, "good")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(store.stored_count(&format!("auth:ip:{}", ip)), 4);

    let response = router.clone().oneshot(login_from(ip, "bad")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");

    let response = router.oneshot(login_from(ip, "bad")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        json["error"],
        "Too many authentication attempts, please try again later."
    );
}

#[tokio::test]
async fn test_api_preset_keys_by_user() {
    let store = Arc::new(RateLimitStore::new());
    let router = limited_router(RateLimitState::preset(Preset::Api, store.clone()))
        // Added last so it runs before the rate limiter
        .layer(middleware::from_fn(fake_auth));

    let request = axum::http::Request::builder()
        .uri("/test")
        .header("x-forwarded-for", "1.2.3.4")
        .header("x-user-id", "alice")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "60");

    router.oneshot(get_from("1.2.3.4")).await.unwrap();

    assert_eq!(store.stored_count("api:user:alice"), 1);
    assert_eq!(store.stored_count("api:ip:1.2.3.4"), 1);
}

#[tokio::test]
async fn test_custom_key_extractor() {
    let store = Arc::new(RateLimitStore::new());
    let state = small_limit(store.clone(), 1).with_extractor(|_: &Request| "global".to_string());
    let global_key = state.limiter().store_key("global");
    let router = limited_router(state);

    let response = router.clone().oneshot(get_from("1.1.1.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // A different address shares the single global key
    let response = router.oneshot(get_from("2.2.2.2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(store.stored_count(&global_key), 1);
}

#[tokio::test]
async fn test_limiters_share_store() {
    let store = Arc::new(RateLimitStore::new());
    let strict = limited_router(RateLimitState::preset(Preset::Strict, store.clone()));
    let lenient = Router::new()
        .route("/other", get(ok_handler))
        .layer(middleware::from_fn_with_state(
            RateLimitState::preset(Preset::Lenient, store.clone())
                .with_extractor(|_: &Request| "lenient".to_string()),
            rate_limit_middleware,
        ));

    strict.oneshot(get_from("1.2.3.4")).await.unwrap();
    let request = axum::http::Request::builder()
        .uri("/other")
        .body(Body::empty())
        .unwrap();
    let response = lenient.oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-ratelimit-remaining"], "199");

    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_cancelled_requests_are_counted() {
    let store = Arc::new(RateLimitStore::new());
    let router = Router::new()
        .route("/slow", get(slow_handler))
        .route("/test", get(ok_handler))
        .layer(middleware::from_fn_with_state(
            RateLimitState::preset(Preset::Strict, store.clone()),
            rate_limit_middleware,
        ));

    for _ in 0..10 {
        let request = axum::http::Request::builder()
            .uri("/slow")
            .header("x-forwarded-for", "198.51.100.4")
            .body(Body::empty())
            .unwrap();
        // The client gives up before the handler answers
        let result =
            tokio::time::timeout(Duration::from_millis(5), router.clone().oneshot(request)).await;
        assert!(result.is_err());
    }

    assert_eq!(store.stored_count("strict:ip:198.51.100.4"), 10);

    let response = router.oneshot(get_from("198.51.100.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_auth_history_survives_api_traffic() {
    let store = Arc::new(RateLimitStore::new());
    let auth = limited_router(RateLimitState::preset(Preset::Auth, store.clone()));
    let api = limited_router(RateLimitState::preset(Preset::Api, store.clone()));
    let ip = "192.0.2.33";

    for _ in 0..5 {
        let response = auth.clone().oneshot(login_from(ip, "bad")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = api.oneshot(get_from(ip)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = auth.oneshot(login_from(ip, "bad")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(store.stored_count(&format!("auth:ip:{}", ip)), 5);
}
