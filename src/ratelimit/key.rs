//! Rate limit key derivation.

use serde::{Deserialize, Serialize};

/// How a limiter derives the key a request is counted under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Count by the caller's network address
    #[default]
    Address,
    /// Count by authenticated user id when known, else by network address
    UserOrAddress,
}

/// The identity a request is counted under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    /// A network address
    Address(String),
    /// An authenticated user id
    User(String),
}

impl RateLimitKey {
    /// Derive the key for a caller according to `strategy`.
    pub fn derive(strategy: KeyStrategy, address: &str, user_id: Option<&str>) -> Self {
        match (strategy, user_id) {
            (KeyStrategy::UserOrAddress, Some(user)) if !user.is_empty() => {
                RateLimitKey::User(user.to_string())
            }
            _ => RateLimitKey::Address(address.to_string()),
        }
    }

    /// The namespaced string form used as the store key.
    pub fn to_string_key(&self) -> String {
        match self {
            RateLimitKey::Address(addr) => format!("ip:{}", addr),
            RateLimitKey::User(id) => format!("user:{}", id),
        }
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
