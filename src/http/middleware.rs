//! Rate limiting middleware for axum routers.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use super::identity::KeyExtractor;
use crate::ratelimit::{
    now_millis, AdmissionGuard, Decision, Preset, QuotaInfo, RateLimitStore, RateLimiter,
    Rejection,
};

/// Maximum requests per window.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Requests left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// ISO-8601 time at which the window expires.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// JSON body sent with rejected requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitExceededBody {
    /// Configured rejection message
    pub error: String,
    /// Seconds until a retry can succeed
    pub retry_after: u64,
}

/// State shared by every invocation of [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<RateLimiter>,
    extractor: Arc<dyn KeyExtractor>,
}

impl RateLimitState {
    /// Wrap a limiter, deriving keys with its configured strategy.
    pub fn new(limiter: RateLimiter) -> Self {
        let extractor = Arc::new(limiter.config().key_strategy);
        Self {
            limiter: Arc::new(limiter),
            extractor,
        }
    }

    /// Build state for a named preset over a shared store.
    pub fn preset(preset: Preset, store: Arc<RateLimitStore>) -> Self {
        Self::new(RateLimiter::with_preset(preset, store))
    }

    /// Replace the key extractor.
    pub fn with_extractor<E>(mut self, extractor: E) -> Self
    where
        E: KeyExtractor + 'static,
    {
        self.extractor = Arc::new(extractor);
        self
    }

    /// The wrapped limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

impl std::fmt::Debug for RateLimitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitState")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

/// Admission control in front of a handler.
///
/// Rejected requests are answered directly. Admitted requests run the rest of
/// the stack, and the final response status decides whether the request is
/// counted. A request abandoned mid-flight is counted as a failure. Both carry
/// the `X-RateLimit-*` headers.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let key = state.extractor.extract(&request);

    match state.limiter.evaluate(&key, now_millis()) {
        Decision::Admit(admission) => {
            // Dropping this future before the handler finishes still records
            let guard = AdmissionGuard::new(state.limiter.clone(), admission);
            let quota = *guard.quota();
            let mut response = next.run(request).await;
            guard.finish(response.status().as_u16());
            insert_quota_headers(response.headers_mut(), &quota);
            response
        }
        Decision::Reject(rejection) => {
            warn!(
                key = %key,
                retry_after = rejection.retry_after_secs,
                "Rate limit exceeded"
            );
            rejection.into_response()
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::TOO_MANY_REQUESTS);
        let body = RateLimitExceededBody {
            error: self.message,
            retry_after: self.retry_after_secs,
        };

        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        insert_quota_headers(headers, &self.quota);
        headers.insert(RETRY_AFTER, HeaderValue::from(self.retry_after_secs));
        response
    }
}

/// Write the `X-RateLimit-*` headers for `quota`.
pub fn insert_quota_headers(headers: &mut HeaderMap, quota: &QuotaInfo) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(quota.remaining));
    if let Ok(reset) = HeaderValue::from_str(&format_reset(quota.reset_at_ms)) {
        headers.insert(X_RATELIMIT_RESET, reset);
    }
}

/// Render a millisecond timestamp as an ISO-8601 UTC string.
pub fn format_reset(reset_at_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(reset_at_ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
