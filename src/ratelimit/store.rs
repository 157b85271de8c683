//! Per-key request timestamp storage.

use std::collections::VecDeque;

use dashmap::DashMap;
use tracing::debug;

/// Timestamps (milliseconds since the Unix epoch) of the counted requests
/// for a single key.
///
/// Timestamps are appended in the order requests are recorded and are never
/// reordered; compaction only removes them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitEntry {
    timestamps: VecDeque<i64>,
}

impl RateLimitEntry {
    /// Create an empty entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored timestamps.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the entry holds no timestamps.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Append a timestamp.
    pub fn push(&mut self, timestamp_ms: i64) {
        self.timestamps.push_back(timestamp_ms);
    }

    /// Drop every timestamp at or before `cutoff_ms`.
    ///
    /// Returns the number of timestamps removed.
    pub fn compact(&mut self, cutoff_ms: i64) -> usize {
        let before = self.timestamps.len();
        self.timestamps.retain(|&t| t > cutoff_ms);
        before - self.timestamps.len()
    }

    /// Count and oldest value of the timestamps after `cutoff_ms`.
    pub fn window(&self, cutoff_ms: i64) -> WindowView {
        self.timestamps
            .iter()
            .filter(|&&t| t > cutoff_ms)
            .fold(WindowView::default(), |view, &t| WindowView {
                count: view.count + 1,
                oldest_ms: Some(view.oldest_ms.map_or(t, |oldest| oldest.min(t))),
            })
    }

    /// Iterate over the stored timestamps in insertion order.
    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        self.timestamps.iter().copied()
    }
}

/// The requests of one key that fall inside a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowView {
    /// Number of timestamps inside the window
    pub count: usize,
    /// Smallest timestamp inside the window
    pub oldest_ms: Option<i64>,
}

/// Summary of a cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    /// Timestamps discarded across all keys
    pub timestamps_removed: usize,
    /// Keys deleted because nothing was left
    pub keys_removed: usize,
}

/// Process-wide mapping from rate limit key to its [`RateLimitEntry`].
///
/// The store is created explicitly and shared by `Arc` between every limiter
/// and the cleanup task. Each key lives in a shard of a concurrent map, so
/// every operation on a key runs under that shard's lock and keys never
/// contend with one another beyond shard collisions.
#[derive(Debug, Default)]
pub struct RateLimitStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl RateLimitStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the portion of `key`'s entry that lies after `cutoff_ms`.
    ///
    /// Missing keys yield an empty view. The stored entry is not modified.
    pub fn window(&self, key: &str, cutoff_ms: i64) -> WindowView {
        self.entries
            .get(key)
            .map(|entry| entry.window(cutoff_ms))
            .unwrap_or_default()
    }

    /// Remove `key` if none of its timestamps lie after `cutoff_ms`.
    ///
    /// Returns `true` when an entry was removed.
    pub fn remove_if_expired(&self, key: &str, cutoff_ms: i64) -> bool {
        self.entries
            .remove_if(key, |_, entry| entry.window(cutoff_ms).count == 0)
            .is_some()
    }

    /// Compact `key`'s entry against `cutoff_ms` and append `timestamp_ms`.
    ///
    /// Creates the entry on first use. Returns the stored count afterwards.
    pub fn record(&self, key: &str, cutoff_ms: i64, timestamp_ms: i64) -> usize {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        entry.compact(cutoff_ms);
        entry.push(timestamp_ms);
        entry.len()
    }

    /// Discard every timestamp at or before `cutoff_ms` and delete keys left empty.
    pub fn purge(&self, cutoff_ms: i64) -> PurgeStats {
        let mut stats = PurgeStats::default();

        self.entries.retain(|key, entry| {
            stats.timestamps_removed += entry.compact(cutoff_ms);
            if entry.is_empty() {
                debug!(key = %key, "Removing empty rate limit entry");
                stats.keys_removed += 1;
                false
            } else {
                true
            }
        });

        stats
    }

    /// Number of timestamps stored for `key`, regardless of age.
    pub fn stored_count(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, |entry| entry.len())
    }

    /// A copy of the entry stored for `key`.
    pub fn entry(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Whether an entry exists for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of keys in the store.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
