use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(value: Value, ttl: Duration) -> Self {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { value, expires_at }
    }

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CacheStats {
    pub valid: usize,
    pub expired: usize,
    pub total: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    // Bumped by every invalidation, matching or not
    epoch: u64,
}

/// In-memory TTL cache for response payloads.
///
/// Expired entries are evicted lazily by `get`; nothing runs in the
/// background unless `spawn_sweeper` is called. Clones share the same
/// entries, so one instance built at startup serves the whole process.
///
/// Readers that fetch on a miss should note `epoch()` first and store with
/// `set_if_epoch`, so a response fetched across an invalidation is dropped
/// instead of resurrecting data the invalidation meant to remove.
#[derive(Debug, Clone, Default)]
pub struct ResponseCache {
    state: Arc<Mutex<CacheState>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored value, unless absent or expired. Expired entries are
    /// removed on the way out.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.state.lock();
        let entry = state.entries.get(key)?;
        if entry.is_expired_at(Utc::now()) {
            state.entries.remove(key);
            debug!(key, "Cache entry expired");
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        debug!(key, ttl_ms = ttl.as_millis() as u64, "Cache entry stored");
        self.state
            .lock()
            .entries
            .insert(key.to_string(), CacheEntry::new(value, ttl));
    }

    /// Current invalidation epoch.
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Store `value` only if no invalidation happened since `epoch` was
    /// read. Returns whether the value was stored.
    pub fn set_if_epoch(&self, key: &str, value: Value, ttl: Duration, epoch: u64) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!(key, epoch, current = state.epoch, "Invalidated since fetch, not storing");
            return false;
        }
        debug!(key, ttl_ms = ttl.as_millis() as u64, "Cache entry stored");
        state
            .entries
            .insert(key.to_string(), CacheEntry::new(value, ttl));
        true
    }

    /// Remove one entry regardless of its remaining lifetime.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        state.epoch += 1;
        let removed = state.entries.remove(key).is_some();
        if removed {
            debug!(key, "Cache entry invalidated");
        }
        removed
    }

    /// Remove every entry whose key matches `pattern`. Returns the number
    /// of entries removed (zero is fine).
    pub fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        let mut state = self.state.lock();
        state.epoch += 1;
        let before = state.entries.len();
        state.entries.retain(|key, _| !pattern.is_match(key));
        let removed = before - state.entries.len();
        if removed > 0 {
            debug!(pattern = %pattern, removed, "Cache entries invalidated by pattern");
        }
        removed
    }

    /// Classify entries as valid or expired without evicting anything.
    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let state = self.state.lock();
        let total = state.entries.len();
        let expired = state.entries.values().filter(|e| e.is_expired_at(now)).count();
        CacheStats {
            valid: total - expired,
            expired,
            total,
        }
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired_at(now));
        before - state.entries.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Periodically purge expired entries. The task ends on its own once
    /// every clone of the cache has been dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let state: Weak<Mutex<CacheState>> = Arc::downgrade(&self.state);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else {
                    break;
                };
                let purged = ResponseCache { state }.purge_expired();
                if purged > 0 {
                    debug!(purged, "Swept expired cache entries");
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
