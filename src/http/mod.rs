//! HTTP surface: identity extraction, rate limiting middleware and the server.

mod identity;
mod middleware;
mod server;

pub use identity::{client_address, AuthenticatedUser, KeyExtractor, UNKNOWN_ADDRESS};
pub use middleware::{
    format_reset, insert_quota_headers, rate_limit_middleware, RateLimitExceededBody,
    RateLimitState, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use server::{router, AnalyticsEvent, HttpServer};
