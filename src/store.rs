//! Persistence boundary for bucket snapshots and timeout markers.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::clock::{Clock, SystemClock, Timestamp};

/// Key-value persistence contract the limiter depends on.
///
/// Entries carry a time-to-live in minutes so idle state garbage-collects
/// itself; an expired entry must behave exactly like an absent one.
///
/// The limiter reads snapshots at construction and writes them back on
/// mutation, so two limiters racing on the same key can drop a hit
/// (last-writer-wins). Implementations wanting exact counts under
/// concurrent writers must layer an atomic increment on top.
pub trait Store: Send + Sync {
    /// Look up the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<Value>;

    /// Store `value` under `key`, expiring after `ttl_minutes`.
    fn put(&self, key: &str, value: Value, ttl_minutes: u64);

    /// Whether a live entry exists under `key`.
    fn has(&self, key: &str) -> bool;

    /// Remove the entry under `key`. Returns `true` if one was present.
    fn forget(&self, key: &str) -> bool;
}

struct Entry {
    value: Value,
    expires_at: Timestamp,
}

/// In-process [`Store`] backed by a concurrent map.
///
/// Expired entries are evicted lazily on access. The clock is injectable
/// so tests can simulate expiry.
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create a store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store on an explicit clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| e.expires_at > now).count()
    }

    /// Whether the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the entry under `key` if it has expired.
    fn evict_expired(&self, key: &str) {
        let now = self.clock.now();
        let expired = self
            .entries
            .get(key)
            .map(|e| e.expires_at <= now)
            .unwrap_or(false);
        if expired {
            self.entries.remove(key);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.evict_expired(key);
        self.entries.get(key).map(|e| e.value.clone())
    }

    fn put(&self, key: &str, value: Value, ttl_minutes: u64) {
        let expires_at = self.clock.now() + (ttl_minutes * 60) as f64;
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
    }

    fn has(&self, key: &str) -> bool {
        self.evict_expired(key);
        self.entries.contains_key(key)
    }

    fn forget(&self, key: &str) -> bool {
        self.evict_expired(key);
        self.entries.remove(key).is_some()
    }
}
