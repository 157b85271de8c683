//! Rate limiting logic and state management.

mod cleanup;
mod key;
mod limiter;
mod policy;
mod store;

pub use cleanup::{cleanup, CleanupTask, DEFAULT_CLEANUP_INTERVAL, DEFAULT_RETENTION};
pub use key::{KeyStrategy, RateLimitKey};
pub use limiter::{
    now_millis, AdmissionGuard, Decision, PendingAdmission, QuotaInfo, RateLimiter, Rejection,
    ABANDONED_STATUS,
};
pub use policy::{
    Preset, RateLimitConfig, RateLimitOptions, DEFAULT_MAX_REQUESTS, DEFAULT_MESSAGE,
    DEFAULT_STATUS_CODE, DEFAULT_WINDOW_MS,
};
pub use store::{PurgeStats, RateLimitEntry, RateLimitStore, WindowView};
