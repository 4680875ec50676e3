//! In-memory TTL cache for idempotent fetch results.
//!
//! Expiry is lazy: a stale entry is dropped when a `get` finds it. The
//! service additionally runs [`TtlCache::purge_expired`] on an interval so
//! keys that are never read again do not accumulate.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::observability::metrics;

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// Counters exposed on the stats endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// A concurrent key → value store with per-entry time-to-live.
pub struct TtlCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the value for `key` if present and not expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();

        // The read guard must be released before any removal on the same shard.
        let fresh = match self.entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                self.record_miss();
                return None;
            }
        };

        match fresh {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(true);
                Some(value)
            }
            None => {
                // A concurrent `set` may have refreshed the entry in between.
                self.entries.remove_if(key, |_, entry| !entry.is_fresh(now));
                self.record_miss();
                None
            }
        }
    }

    /// Store `value` under `key`, replacing any existing entry.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
        metrics::record_cache_size(self.entries.len());
    }

    /// Remove a single entry. Returns whether one was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            metrics::record_cache_size(self.entries.len());
        }
        removed
    }

    /// Remove every entry and return how many there were.
    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        metrics::record_cache_size(0);
        count
    }

    /// Drop all expired entries and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        let after = self.entries.len();
        metrics::record_cache_size(after);
        before.saturating_sub(after)
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            size: self.entries.len(),
            hits,
            misses,
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        }
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(false);
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
