//! Client identity extraction for rate limit keys.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};

use crate::ratelimit::{KeyStrategy, RateLimitKey};

/// Address used when a request carries no usable client address.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Request extension naming the authenticated user.
///
/// Authentication middleware running before the rate limiter inserts this so
/// user-keyed presets can count per user instead of per address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Maps an inbound request to the key its quota is tracked under.
pub trait KeyExtractor: Send + Sync {
    /// Derive the rate limit key for `request`.
    fn extract(&self, request: &Request) -> String;
}

impl KeyExtractor for KeyStrategy {
    fn extract(&self, request: &Request) -> String {
        let address = client_address(request);
        let user = request
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|user| user.0.as_str());
        RateLimitKey::derive(*self, &address, user).to_string_key()
    }
}

impl<F> KeyExtractor for F
where
    F: Fn(&Request) -> String + Send + Sync,
{
    fn extract(&self, request: &Request) -> String {
        self(request)
    }
}

/// Best-effort network address of the caller.
///
/// Proxy headers win over the socket peer: the first `X-Forwarded-For` entry,
/// then `X-Real-IP`, then the connection's peer address.
pub fn client_address(request: &Request) -> String {
    let headers = request.headers();

    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
        .map(str::to_string)
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())
}
