//! Bounded in-memory caching for the marquee catalog client
//!
//! This crate provides the storage half of the catalog data layer: a bounded
//! TTL cache with FIFO or LRU eviction, and a stale-while-revalidate store
//! built on top of it. Nothing here knows about HTTP or movies; values are
//! generic and sized by a caller-supplied estimator.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        SwrStore<V, E>               │
//! │  stale tagging, background refresh, │
//! │  recorded errors, reconcile hook    │
//! └─────────────────────────────────────┘
//!                  │
//! ┌─────────────────────────────────────┐
//! │        MemoryCache<V>               │
//! │  TTL, FIFO / LRU eviction,          │
//! │  count and byte bounds, stats       │
//! └─────────────────────────────────────┘
//!                  │
//! ┌─────────────────────────────────────┐
//! │        SizeEstimator<V>             │
//! │  json length x 2 | unit             │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use marquee_cache::{MemoryCache, MemoryCacheConfig};
//! use std::time::Duration;
//!
//! let cache = MemoryCache::<Vec<u32>>::with_json_estimator(MemoryCacheConfig::advanced(4096))?;
//! cache.set("popular?page=1", vec![550, 680], Duration::from_secs(300));
//!
//! assert_eq!(cache.get("popular?page=1"), Some(vec![550, 680]));
//! assert_eq!(cache.stats().hits, 1);
//! # Ok::<(), marquee_cache::CacheError>(())
//! ```
//!
//! # Expiry
//!
//! An entry is logically absent once it is older than its TTL. Expired
//! entries are removed lazily: by the lookup that finds them, by an insert
//! that needs room, or by [`MemoryCache::purge_expired`].

#![warn(missing_docs)]
#![allow(clippy::return_self_not_must_use)] // Builder patterns
#![allow(clippy::float_cmp)] // Statistics need exact float comparisons

pub mod config;
pub mod error;
pub mod estimate;
pub mod memory_cache;
pub mod stats;
pub mod swr;

pub use config::{EvictionPolicy, MemoryCacheConfig, SwrConfig};
pub use error::{CacheError, CacheResult};
pub use estimate::{SizeEstimator, json_size_estimator, unit_size_estimator};
pub use memory_cache::{EntryMeta, MemoryCache};
pub use stats::{AtomicCacheMetrics, CacheStats};
pub use swr::{Reconciler, SwrResult, SwrStore};
