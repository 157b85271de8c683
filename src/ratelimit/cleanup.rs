//! Periodic garbage collection of the rate limit store.
//!
//! Evaluation already ignores timestamps outside a key's window, so this pass
//! is memory hygiene only: it drops timestamps older than a retention horizon
//! and deletes keys that end up empty.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::limiter::now_millis;
use super::store::{PurgeStats, RateLimitStore};

/// Default interval between cleanup passes: one hour.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Default retention horizon: 24 hours.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Run a single cleanup pass at `now_ms`.
pub fn cleanup(store: &RateLimitStore, now_ms: i64, retention: Duration) -> PurgeStats {
    let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
    let cutoff = now_ms.saturating_sub(retention_ms);
    let stats = store.purge(cutoff);

    debug!(
        timestamps_removed = stats.timestamps_removed,
        keys_removed = stats.keys_removed,
        keys_remaining = store.len(),
        "Rate limit store cleanup complete"
    );

    stats
}

/// Handle to the background cleanup task.
///
/// The task stops when [`shutdown`](Self::shutdown) is called or the handle
/// is dropped.
#[derive(Debug)]
pub struct CleanupTask {
    handle: Option<JoinHandle<()>>,
}

impl CleanupTask {
    /// Spawn the cleanup loop on the current tokio runtime.
    pub fn spawn(store: Arc<RateLimitStore>, interval: Duration, retention: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_CLEANUP_INTERVAL
        } else {
            interval
        };

        info!(
            interval_secs = interval.as_secs(),
            retention_secs = retention.as_secs(),
            "Starting rate limit cleanup task"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                cleanup(&store, now_millis(), retention);
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
            info!("Rate limit cleanup task stopped");
        }
    }
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
