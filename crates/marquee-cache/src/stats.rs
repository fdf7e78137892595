//! Cache statistics and metrics types
//!
//! Counters are kept in atomics so statistics can be recorded from read
//! paths without widening the critical section of the owning cache.

#![allow(clippy::cast_precision_loss)] // Hit rate calculation intentionally accepts precision loss

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache statistics snapshot
///
/// Point-in-time view of cache usage. `entry_count` and `size_bytes` reflect
/// physically present entries, which may include expired entries that have
/// not yet been touched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of successful lookups
    pub hits: u64,
    /// Number of lookups that found nothing or an expired entry
    pub misses: u64,
    /// Number of entries removed to make room for an insert
    pub evictions: u64,
    /// Number of expired entries removed
    pub expirations: u64,
    /// Number of inserts and overwrites
    pub writes: u64,
    /// `hits / (hits + misses)`, 0.0 before the first lookup
    pub hit_rate: f64,
    /// Current number of entries
    pub entry_count: usize,
    /// Current estimated size of all entries
    pub size_bytes: usize,
    /// Configured size bound, if any
    pub max_size_bytes: Option<usize>,
}

impl CacheStats {
    /// Calculate miss rate (misses / total lookups)
    pub fn miss_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.misses as f64 / total as f64
        }
    }

    /// Fraction of the configured size bound in use
    pub fn size_utilization(&self) -> Option<f64> {
        self.max_size_bytes
            .filter(|max| *max > 0)
            .map(|max| self.size_bytes as f64 / max as f64)
    }
}

/// Atomic counters backing [`CacheStats`]
#[derive(Debug, Default)]
pub struct AtomicCacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    writes: AtomicU64,
}

impl AtomicCacheMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful lookup
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed lookup
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one capacity eviction
    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record expired entries being dropped
    #[inline]
    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    /// Record an insert or overwrite
    #[inline]
    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Build a snapshot, combining counters with the owner's live totals
    pub fn snapshot(
        &self,
        entry_count: usize,
        size_bytes: usize,
        max_size_bytes: Option<usize>,
    ) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            entry_count,
            size_bytes,
            max_size_bytes,
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
    }
}
