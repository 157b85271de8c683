//! Core rate limiter implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use super::policy::{Preset, RateLimitConfig};
use super::store::RateLimitStore;

/// Status recorded for an admitted request whose response never completed.
///
/// It is a client error, so it counts unless failed requests are skipped.
pub const ABANDONED_STATUS: u16 = 499;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Quota metadata reported for every evaluated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaInfo {
    /// Requests allowed per window
    pub limit: u32,
    /// Requests left in the window after this one
    pub remaining: u32,
    /// When the window expires, in milliseconds since the Unix epoch
    pub reset_at_ms: i64,
}

/// Outcome of [`RateLimiter::evaluate`].
#[derive(Debug)]
pub enum Decision {
    /// The request may proceed; record its outcome once the response is known.
    Admit(PendingAdmission),
    /// The key has used up its quota.
    Reject(Rejection),
}

impl Decision {
    /// Quota metadata for either outcome.
    pub fn quota(&self) -> &QuotaInfo {
        match self {
            Decision::Admit(admission) => &admission.quota,
            Decision::Reject(rejection) => &rejection.quota,
        }
    }

    /// Whether the request was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admit(_))
    }
}

/// A provisionally admitted request whose timestamp is not yet committed.
///
/// The token is consumed by [`RateLimiter::record_outcome`], so an admitted
/// request is recorded at most once.
#[derive(Debug)]
#[must_use = "an admitted request must be passed to record_outcome to be counted"]
pub struct PendingAdmission {
    key: String,
    timestamp_ms: i64,
    quota: QuotaInfo,
}

impl PendingAdmission {
    /// The scoped store key the request is counted under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The evaluation time that will be recorded.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// Quota metadata computed at evaluation.
    pub fn quota(&self) -> &QuotaInfo {
        &self.quota
    }
}

/// A rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Quota metadata; `remaining` is always zero
    pub quota: QuotaInfo,
    /// Whole seconds until the oldest counted request leaves the window
    pub retry_after_secs: u64,
    /// HTTP status configured for rejections
    pub status_code: u16,
    /// Message configured for rejections
    pub message: String,
}

/// A sliding-window rate limiter bound to one configuration.
///
/// Limiters share a [`RateLimitStore`]. Every key is stored under the
/// limiter's scope (`<scope>:<key>`), so limiters with different windows never
/// compact or count each other's timestamps. Limiters built with
/// [`new`](Self::new) get a unique scope; preset limiters are scoped by the
/// preset name and therefore share quota with other limiters of that preset.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    scope: String,
    config: RateLimitConfig,
    store: Arc<RateLimitStore>,
}

impl RateLimiter {
    /// Create a limiter over `store` with a scope of its own.
    pub fn new(config: impl Into<RateLimitConfig>, store: Arc<RateLimitStore>) -> Self {
        let id = NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            scope: format!("limiter-{}", id),
            config: config.into(),
            store,
        }
    }

    /// Create a limiter using a named preset, scoped by the preset name.
    pub fn with_preset(preset: Preset, store: Arc<RateLimitStore>) -> Self {
        Self::new(preset.config(), store).with_scope(preset.as_str())
    }

    /// Replace the scope. Limiters with equal scopes share quota.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// The namespace this limiter's keys are stored under.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The store key used for the request key `key`.
    pub fn store_key(&self, key: &str) -> String {
        format!("{}:{}", self.scope, key)
    }

    /// The limiter's configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// The store this limiter records into.
    pub fn store(&self) -> &Arc<RateLimitStore> {
        &self.store
    }

    /// Decide whether a request for `key` arriving at `now_ms` may proceed.
    ///
    /// Nothing is recorded here. An admitted request is only counted once its
    /// [`PendingAdmission`] is passed to [`record_outcome`](Self::record_outcome).
    pub fn evaluate(&self, key: &str, now_ms: i64) -> Decision {
        let key = self.store_key(key);
        let window_ms = self.window_ms();
        let window_start = now_ms.saturating_sub(window_ms);
        let view = self.store.window(&key, window_start);
        let limit = self.config.max_requests;

        trace!(
            key = %key,
            in_window = view.count,
            limit = limit,
            "Evaluating rate limit"
        );

        if view.count >= limit as usize {
            // A full window always has an oldest timestamp.
            let oldest = view.oldest_ms.unwrap_or(now_ms);
            let reset_at_ms = oldest.saturating_add(window_ms);
            let retry_after_secs = ceil_secs(reset_at_ms.saturating_sub(now_ms));

            debug!(
                key = %key,
                count = view.count,
                limit = limit,
                retry_after_secs = retry_after_secs,
                "Rate limit exceeded"
            );

            return Decision::Reject(Rejection {
                quota: QuotaInfo {
                    limit,
                    remaining: 0,
                    reset_at_ms,
                },
                retry_after_secs,
                status_code: self.config.status_code,
                message: self.config.message.clone(),
            });
        }

        if view.count == 0 && self.store.remove_if_expired(&key, window_start) {
            trace!(key = %key, "Dropped expired rate limit entry");
        }

        let remaining = (limit as usize).saturating_sub(view.count + 1) as u32;

        Decision::Admit(PendingAdmission {
            key,
            timestamp_ms: now_ms,
            quota: QuotaInfo {
                limit,
                remaining,
                reset_at_ms: now_ms.saturating_add(window_ms),
            },
        })
    }

    /// Evaluate `key` at the current wall-clock time.
    pub fn evaluate_now(&self, key: &str) -> Decision {
        self.evaluate(key, now_millis())
    }

    /// Commit an admitted request once its response status is known.
    ///
    /// Returns `true` if the request now counts toward the key's quota, or
    /// `false` if the configured skip flags excluded it.
    pub fn record_outcome(&self, admission: PendingAdmission, status: u16) -> bool {
        if !self.config.counts_outcome(status) {
            trace!(
                key = %admission.key,
                status = status,
                "Outcome not counted"
            );
            return false;
        }

        let window_start = admission.timestamp_ms.saturating_sub(self.window_ms());
        let count = self
            .store
            .record(&admission.key, window_start, admission.timestamp_ms);

        trace!(
            key = %admission.key,
            status = status,
            count = count,
            "Outcome recorded"
        );
        true
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.config.window_ms).unwrap_or(i64::MAX)
    }
}

/// Records a [`PendingAdmission`] once, whether or not the response completes.
///
/// [`finish`](Self::finish) records the response status. A guard dropped
/// before that, because the client went away, a timeout fired or the handler
/// panicked, records [`ABANDONED_STATUS`] instead.
#[derive(Debug)]
pub struct AdmissionGuard {
    limiter: Arc<RateLimiter>,
    quota: QuotaInfo,
    admission: Option<PendingAdmission>,
}

impl AdmissionGuard {
    /// Take ownership of `admission` on behalf of `limiter`.
    pub fn new(limiter: Arc<RateLimiter>, admission: PendingAdmission) -> Self {
        Self {
            limiter,
            quota: admission.quota,
            admission: Some(admission),
        }
    }

    /// Quota metadata computed at evaluation.
    pub fn quota(&self) -> &QuotaInfo {
        &self.quota
    }

    /// Record the admission with the final response status.
    ///
    /// Returns whether the request counts toward the quota.
    pub fn finish(mut self, status: u16) -> bool {
        match self.admission.take() {
            Some(admission) => self.limiter.record_outcome(admission, status),
            None => false,
        }
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if let Some(admission) = self.admission.take() {
            debug!(key = %admission.key, "Admitted request abandoned before completion");
            self.limiter.record_outcome(admission, ABANDONED_STATUS);
        }
    }
}

/// Milliseconds since the Unix epoch according to the system clock.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn ceil_secs(ms: i64) -> u64 {
    if ms <= 0 {
        0
    } else {
        (ms as u64).div_ceil(1000)
    }
}
