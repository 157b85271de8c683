//! Rate limit configuration and named presets.
//!
//! Callers describe a limiter with [`RateLimitOptions`], where every field is
//! optional. Resolving the options yields an immutable [`RateLimitConfig`];
//! missing or nonsensical values fall back to defaults instead of failing.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::key::KeyStrategy;

/// Default window: 15 minutes.
pub const DEFAULT_WINDOW_MS: u64 = 15 * 60 * 1000;
/// Default number of requests allowed per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 100;
/// Default HTTP status returned on rejection.
pub const DEFAULT_STATUS_CODE: u16 = 429;
/// Default rejection message.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

const AUTH_MESSAGE: &str = "Too many authentication attempts, please try again later.";

/// Unresolved limiter settings.
///
/// Numeric fields are signed so that negative input can be recognised and
/// replaced with the default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitOptions {
    /// Window length in milliseconds
    #[serde(default)]
    pub window_ms: Option<i64>,
    /// Requests allowed per window
    #[serde(default)]
    pub max_requests: Option<i64>,
    /// HTTP status to answer rejected requests with
    #[serde(default)]
    pub status_code: Option<i64>,
    /// Message placed in the rejection body
    #[serde(default)]
    pub message: Option<String>,
    /// How request keys are derived
    #[serde(default)]
    pub key_strategy: Option<KeyStrategy>,
    /// Do not count requests that finish with a status below 400
    #[serde(default)]
    pub skip_successful_requests: Option<bool>,
    /// Do not count requests that finish with a status of 400 or above
    #[serde(default)]
    pub skip_failed_requests: Option<bool>,
}

impl RateLimitOptions {
    /// Resolve into a config, coercing invalid values to defaults.
    pub fn resolve(self) -> RateLimitConfig {
        let window_ms = match self.window_ms {
            None => DEFAULT_WINDOW_MS,
            Some(ms) if ms > 0 => ms as u64,
            Some(ms) => {
                warn!(window_ms = ms, "Invalid rate limit window, using default");
                DEFAULT_WINDOW_MS
            }
        };

        let max_requests = match self.max_requests {
            None => DEFAULT_MAX_REQUESTS,
            Some(max) if max > 0 && max <= u32::MAX as i64 => max as u32,
            Some(max) => {
                warn!(max_requests = max, "Invalid rate limit maximum, using default");
                DEFAULT_MAX_REQUESTS
            }
        };

        let status_code = match self.status_code {
            None => DEFAULT_STATUS_CODE,
            Some(code) if (400..=599).contains(&code) => code as u16,
            Some(code) => {
                warn!(status_code = code, "Invalid rejection status, using default");
                DEFAULT_STATUS_CODE
            }
        };

        let message = self
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MESSAGE.to_string());

        RateLimitConfig {
            window_ms,
            max_requests,
            status_code,
            message,
            key_strategy: self.key_strategy.unwrap_or_default(),
            skip_successful_requests: self.skip_successful_requests.unwrap_or(false),
            skip_failed_requests: self.skip_failed_requests.unwrap_or(false),
        }
    }
}

/// Resolved, immutable settings of one limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Window length in milliseconds (always > 0)
    pub window_ms: u64,
    /// Requests allowed per window (always > 0)
    pub max_requests: u32,
    /// HTTP status for rejections (always 400..=599)
    pub status_code: u16,
    /// Message placed in the rejection body
    pub message: String,
    /// How request keys are derived
    pub key_strategy: KeyStrategy,
    /// Do not count requests that finish with a status below 400
    pub skip_successful_requests: bool,
    /// Do not count requests that finish with a status of 400 or above
    pub skip_failed_requests: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitOptions::default().resolve()
    }
}

impl RateLimitConfig {
    /// Whether a request that finished with `status` counts toward the limit.
    pub fn counts_outcome(&self, status: u16) -> bool {
        if status < 400 {
            !self.skip_successful_requests
        } else {
            !self.skip_failed_requests
        }
    }
}

impl From<RateLimitOptions> for RateLimitConfig {
    fn from(options: RateLimitOptions) -> Self {
        options.resolve()
    }
}

/// Fixed configuration bundles used by route glue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// 10 requests per 15 minutes
    Strict,
    /// 50 requests per 15 minutes
    Moderate,
    /// 200 requests per 15 minutes
    Lenient,
    /// 5 counted requests per 15 minutes; successful requests are not counted
    Auth,
    /// 60 requests per minute, keyed by user when authenticated
    Api,
}

impl Preset {
    /// Every preset, in declaration order.
    pub const ALL: [Preset; 5] = [
        Preset::Strict,
        Preset::Moderate,
        Preset::Lenient,
        Preset::Auth,
        Preset::Api,
    ];

    /// The preset's name as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Strict => "strict",
            Preset::Moderate => "moderate",
            Preset::Lenient => "lenient",
            Preset::Auth => "auth",
            Preset::Api => "api",
        }
    }

    /// The options bundled by this preset.
    pub fn options(&self) -> RateLimitOptions {
        let fifteen_minutes = Some(DEFAULT_WINDOW_MS as i64);
        match self {
            Preset::Strict => RateLimitOptions {
                window_ms: fifteen_minutes,
                max_requests: Some(10),
                ..Default::default()
            },
            Preset::Moderate => RateLimitOptions {
                window_ms: fifteen_minutes,
                max_requests: Some(50),
                ..Default::default()
            },
            Preset::Lenient => RateLimitOptions {
                window_ms: fifteen_minutes,
                max_requests: Some(200),
                ..Default::default()
            },
            Preset::Auth => RateLimitOptions {
                window_ms: fifteen_minutes,
                max_requests: Some(5),
                message: Some(AUTH_MESSAGE.to_string()),
                skip_successful_requests: Some(true),
                ..Default::default()
            },
            Preset::Api => RateLimitOptions {
                window_ms: Some(60 * 1000),
                max_requests: Some(60),
                key_strategy: Some(KeyStrategy::UserOrAddress),
                ..Default::default()
            },
        }
    }

    /// The resolved configuration of this preset.
    pub fn config(&self) -> RateLimitConfig {
        self.options().resolve()
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RateLimitConfig::default();
        assert_eq!(config.window_ms, 900_000);
        assert_eq!(config.max_requests, 100);
        assert_eq!(config.status_code, 429);
        assert_eq!(config.message, DEFAULT_MESSAGE);
        assert_eq!(config.key_strategy, KeyStrategy::Address);
        assert!(!config.skip_successful_requests);
        assert!(!config.skip_failed_requests);
    }

    #[test]
    fn test_invalid_numbers_coerced() {
        let config = RateLimitOptions {
            window_ms: Some(0),
            max_requests: Some(-3),
            status_code: Some(200),
            message: Some("   ".to_string()),
            ..Default::default()
        }
        .resolve();

        assert_eq!(config.window_ms, DEFAULT_WINDOW_MS);
        assert_eq!(config.max_requests, DEFAULT_MAX_REQUESTS);
        assert_eq!(config.status_code, DEFAULT_STATUS_CODE);
        assert_eq!(config.message, DEFAULT_MESSAGE);
    }

    #[test]
    fn test_oversized_max_coerced() {
        let config = RateLimitOptions {
            max_requests: Some(i64::from(u32::MAX) + 1),
            status_code: Some(600),
            ..Default::default()
        }
        .resolve();

        assert_eq!(config.max_requests, DEFAULT_MAX_REQUESTS);
        assert_eq!(config.status_code, DEFAULT_STATUS_CODE);
    }

    #[test]
    fn test_valid_values_kept() {
        let config = RateLimitOptions {
            window_ms: Some(1000),
            max_requests: Some(2),
            status_code: Some(503),
            message: Some("slow down".to_string()),
            key_strategy: Some(KeyStrategy::UserOrAddress),
            skip_successful_requests: Some(false),
            skip_failed_requests: Some(true),
        }
        .resolve();

        assert_eq!(config.window_ms, 1000);
        assert_eq!(config.max_requests, 2);
        assert_eq!(config.status_code, 503);
        assert_eq!(config.message, "slow down");
        assert_eq!(config.key_strategy, KeyStrategy::UserOrAddress);
        assert!(config.skip_failed_requests);
    }

    #[test]
    fn test_parse_options_from_yaml() {
        let yaml = r#"
window_ms: 60000
max_requests: 5
skip_failed_requests: true
"#;
        let options: RateLimitOptions = serde_yaml::from_str(yaml).unwrap();
        let config = RateLimitConfig::from(options);
        assert_eq!(config.window_ms, 60_000);
        assert_eq!(config.max_requests, 5);
        assert!(config.skip_failed_requests);
        assert_eq!(config.status_code, 429);
    }

    #[test]
    fn test_counts_outcome() {
        let config = Preset::Auth.config();
        assert!(!config.counts_outcome(200));
        assert!(!config.counts_outcome(302));
        assert!(config.counts_outcome(401));
        assert!(config.counts_outcome(500));

        let config = RateLimitOptions {
            skip_failed_requests: Some(true),
            ..Default::default()
        }
        .resolve();
        assert!(config.counts_outcome(200));
        assert!(!config.counts_outcome(400));
    }

    #[test]
    fn test_presets() {
        let strict = Preset::Strict.config();
        assert_eq!((strict.max_requests, strict.window_ms), (10, 900_000));

        let moderate = Preset::Moderate.config();
        assert_eq!((moderate.max_requests, moderate.window_ms), (50, 900_000));

        let lenient = Preset::Lenient.config();
        assert_eq!((lenient.max_requests, lenient.window_ms), (200, 900_000));

        let auth = Preset::Auth.config();
        assert_eq!((auth.max_requests, auth.window_ms), (5, 900_000));
        assert!(auth.skip_successful_requests);
        assert!(!auth.skip_failed_requests);

        let api = Preset::Api.config();
        assert_eq!((api.max_requests, api.window_ms), (60, 60_000));
        assert_eq!(api.key_strategy, KeyStrategy::UserOrAddress);
    }

    #[test]
    fn test_preset_names() {
        for preset in Preset::ALL {
            let parsed: Preset = serde_yaml::from_str(preset.as_str()).unwrap();
            assert_eq!(parsed, preset);
        }
        assert_eq!(Preset::Api.to_string(), "api");
    }
}
