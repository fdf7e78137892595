//! Speculative prefetching
//!
//! Prefetches run the same fetch path as real lookups, so they share the
//! retry budget and circuit breaker. Their results land in a separate
//! store and their failures are only logged.

use dashmap::DashSet;
use marquee_cache::{CacheStats, MemoryCache, MemoryCacheConfig};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use crate::cancel::CancellationToken;
use crate::error::{CatalogError, Result};

/// What a prefetch call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchOutcome {
    /// Fetched and stored
    Stored,
    /// A result was already stored
    AlreadyCached,
    /// Another prefetch for the id is running
    AlreadyInFlight,
    /// The fetch failed; the error was logged and dropped
    Failed,
    /// The caller cancelled
    Cancelled,
    /// The store was cleared while the fetch ran; the result was dropped
    Discarded,
}

struct InFlightGuard {
    in_flight: Arc<DashSet<String>>,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

/// Stores speculative fetch results keyed by resource id
pub struct PrefetchManager<T> {
    store: MemoryCache<T>,
    in_flight: Arc<DashSet<String>>,
    generation: AtomicU64,
}

impl<T> std::fmt::Debug for PrefetchManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchManager")
            .field("store", &self.store)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> PrefetchManager<T> {
    /// Create a manager with a count-bounded store
    pub fn new(config: MemoryCacheConfig) -> Result<Self> {
        Ok(Self {
            store: MemoryCache::counted(config)?,
            in_flight: Arc::new(DashSet::new()),
            generation: AtomicU64::new(0),
        })
    }

    /// Fetch `id` speculatively unless it is stored or already in flight
    ///
    /// Failures never propagate; they are logged at debug level. A result
    /// that lands after [`PrefetchManager::clear`] is dropped.
    pub async fn prefetch<F, Fut>(
        &self,
        id: &str,
        cancel: &CancellationToken,
        fetch: F,
    ) -> PrefetchOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.store.has(id) {
            trace!("prefetch of {id} skipped, already stored");
            return PrefetchOutcome::AlreadyCached;
        }
        if !self.in_flight.insert(id.to_string()) {
            trace!("prefetch of {id} skipped, already in flight");
            return PrefetchOutcome::AlreadyInFlight;
        }
        let _guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            id: id.to_string(),
        };
        let generation = self.generation.load(Ordering::Acquire);

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CatalogError::Cancelled),
            result = fetch() => result,
        };

        match result {
            Ok(_) if self.generation.load(Ordering::Acquire) != generation => {
                debug!("prefetch of {id} discarded, store was cleared");
                PrefetchOutcome::Discarded
            }
            Ok(value) => {
                self.store.set_default(id, value);
                debug!("prefetched {id}");
                PrefetchOutcome::Stored
            }
            Err(CatalogError::Cancelled) => PrefetchOutcome::Cancelled,
            Err(error) => {
                debug!("prefetch of {id} failed: {error}");
                PrefetchOutcome::Failed
            }
        }
    }

    /// Store a value fetched elsewhere
    pub fn insert(&self, id: &str, value: T) {
        self.store.set_default(id, value);
    }

    /// Previously prefetched value for `id`
    pub fn get_prefetched(&self, id: &str) -> Option<T> {
        self.store.get(id)
    }

    /// Whether a prefetch for `id` is running
    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.contains(id)
    }

    /// Store statistics
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Drop stored results and in-flight bookkeeping
    ///
    /// Prefetches still running finish but do not store their results.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.store.clear();
        self.in_flight.clear();
    }
}
