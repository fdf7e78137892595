//! Bounded in-memory cache with TTL expiry
//!
//! Entries live in a single `HashMap` guarded by a `parking_lot::Mutex`.
//! Expiry is lazy: an expired entry stays in the map until a lookup, an
//! eviction pass or [`MemoryCache::purge_expired`] finds it.
//!
//! Eviction is an O(n) scan over the map for the victim with the smallest
//! insertion sequence (FIFO) or access tick (LRU). The caches this crate
//! serves hold tens to a few hundred entries.

use crate::{
    config::{EvictionPolicy, MemoryCacheConfig},
    error::{CacheError, CacheResult},
    estimate::{SizeEstimator, json_size_estimator, unit_size_estimator},
    stats::{AtomicCacheMetrics, CacheStats},
};
use parking_lot::Mutex;
use serde::Serialize;
use std::{collections::HashMap, fmt, time::Duration};
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
    size_bytes: usize,
    /// Insertion sequence, drives FIFO order
    sequence: u64,
    /// Logical clock value of the last read or write, drives LRU order
    last_accessed: u64,
    access_count: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

struct State<V> {
    entries: HashMap<String, Entry<V>>,
    size_bytes: usize,
    clock: u64,
}

impl<V> State<V> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.size_bytes -= entry.size_bytes;
        Some(entry)
    }
}

/// Metadata about a live entry, read without affecting eviction order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    /// Time since the entry was written
    pub age: Duration,
    /// TTL the entry was written with
    pub ttl: Duration,
    /// Writes plus successful reads
    pub access_count: u64,
    /// Estimated payload size
    pub size_bytes: usize,
}

/// Bounded key/value cache with per-entry TTL
///
/// `set` makes room before inserting: entries are evicted until both the
/// count and byte bounds admit the new value or the cache is empty. A value
/// larger than `max_size_bytes` is still stored once everything else is gone.
pub struct MemoryCache<V> {
    state: Mutex<State<V>>,
    config: MemoryCacheConfig,
    estimator: SizeEstimator<V>,
    metrics: AtomicCacheMetrics,
}

impl<V> fmt::Debug for MemoryCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryCache")
            .field("config", &self.config)
            .field("entries", &state.entries.len())
            .field("size_bytes", &state.size_bytes)
            .finish_non_exhaustive()
    }
}

impl<V: Clone> MemoryCache<V> {
    /// Create a cache with an explicit size estimator
    pub fn new(config: MemoryCacheConfig, estimator: SizeEstimator<V>) -> CacheResult<Self> {
        config
            .validate()
            .map_err(CacheError::InvalidConfiguration)?;

        Ok(Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                size_bytes: 0,
                clock: 0,
            }),
            config,
            estimator,
            metrics: AtomicCacheMetrics::new(),
        })
    }

    /// Create a count-bounded cache where every entry weighs one unit
    pub fn counted(config: MemoryCacheConfig) -> CacheResult<Self> {
        Self::new(config, unit_size_estimator())
    }

    /// Get the cache configuration
    pub fn config(&self) -> &MemoryCacheConfig {
        &self.config
    }

    /// Insert or overwrite `key` with the given TTL
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let size_bytes = (self.estimator)(&value);
        let now = Instant::now();

        let mut guard = self.state.lock();
        let state = &mut *guard;

        // An overwrite must not count its own previous size against the bound
        state.remove(&key);

        if self.needs_room(state, size_bytes) {
            self.purge_expired_locked(state, now);
        }
        while !state.entries.is_empty() && self.needs_room(state, size_bytes) {
            let Some(victim) = self.pick_victim(state) else {
                break;
            };
            state.remove(&victim);
            self.metrics.record_eviction();
            trace!("evicted cache entry {victim}");
        }

        let tick = state.tick();
        state.size_bytes += size_bytes;
        state.entries.insert(
            key,
            Entry {
                value,
                created_at: now,
                ttl,
                size_bytes,
                sequence: tick,
                last_accessed: tick,
                access_count: 1,
            },
        );
        self.metrics.record_write();
    }

    /// Insert with the configured default TTL
    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.config.default_ttl);
    }

    /// Look up `key`
    ///
    /// A missing or expired key counts as a miss; an expired entry is removed
    /// as a side effect.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let expired = match state.entries.get(key) {
            None => {
                self.metrics.record_miss();
                trace!("cache miss: {key}");
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            state.remove(key);
            self.metrics.record_expirations(1);
            self.metrics.record_miss();
            trace!("cache entry expired: {key}");
            return None;
        }

        let tick = state.tick();
        let entry = state.entries.get_mut(key)?;
        if self.config.eviction_policy == EvictionPolicy::Lru {
            entry.last_accessed = tick;
        }
        entry.access_count += 1;
        self.metrics.record_hit();
        trace!("cache hit: {key}");
        Some(entry.value.clone())
    }

    /// Read a live value without counting a lookup or touching eviction order
    pub fn peek(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Whether a live entry exists for `key`
    ///
    /// Does not count as a lookup and does not touch eviction order.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Metadata for a live entry without touching eviction order
    pub fn get_entry_meta(&self, key: &str) -> Option<EntryMeta> {
        let now = Instant::now();
        let state = self.state.lock();
        let entry = state.entries.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        Some(EntryMeta {
            age: now.saturating_duration_since(entry.created_at),
            ttl: entry.ttl,
            access_count: entry.access_count,
            size_bytes: entry.size_bytes,
        })
    }

    /// Remove `key`, returning its value if it was live
    pub fn remove(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let entry = self.state.lock().remove(key)?;
        (!entry.is_expired(now)).then_some(entry.value)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.state.lock();
        self.purge_expired_locked(&mut guard, now)
    }

    /// Drop all entries and reset statistics
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.size_bytes = 0;
        self.metrics.reset();
    }

    /// Number of physically present entries
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Current estimated size of all entries
    pub fn size_bytes(&self) -> usize {
        self.state.lock().size_bytes
    }

    /// Snapshot of cache statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        self.metrics.snapshot(
            state.entries.len(),
            state.size_bytes,
            self.config.max_size_bytes,
        )
    }

    fn needs_room(&self, state: &State<V>, incoming: usize) -> bool {
        let over_bytes = self
            .config
            .max_size_bytes
            .is_some_and(|max| state.size_bytes + incoming > max);
        let over_count = self
            .config
            .max_entries
            .is_some_and(|max| state.entries.len() >= max);
        over_bytes || over_count
    }

    fn pick_victim(&self, state: &State<V>) -> Option<String> {
        let entries = state.entries.iter();
        let victim = match self.config.eviction_policy {
            EvictionPolicy::Fifo => entries.min_by_key(|(_, entry)| entry.sequence),
            EvictionPolicy::Lru => entries.min_by_key(|(_, entry)| entry.last_accessed),
        };
        victim.map(|(key, _)| key.clone())
    }

    fn purge_expired_locked(&self, state: &mut State<V>, now: Instant) -> usize {
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }

        if !expired.is_empty() {
            self.metrics.record_expirations(expired.len() as u64);
            trace!("purged {} expired cache entries", expired.len());
        }
        expired.len()
    }
}

impl<V: Clone + Serialize> MemoryCache<V> {
    /// Create a cache sized by serialized JSON length
    pub fn with_json_estimator(config: MemoryCacheConfig) -> CacheResult<Self> {
        Self::new(config, json_size_estimator())
    }
}
