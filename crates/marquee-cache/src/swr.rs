//! Stale-while-revalidate storage
//!
//! A [`SwrStore`] serves whatever it holds immediately. Once a value is
//! older than `max_age` it is still served, tagged stale, and a background
//! task refreshes it. Only a key with nothing stored blocks the caller on a
//! fetch.
//!
//! ```text
//!  get(key) ──► stored? ──no──► fetch (foreground) ──► commit ──► fresh
//!                 │
//!                 yes ──► age > max_age? ──no──► fresh
//!                              │
//!                              yes ──► spawn refresh ──► stale (served now)
//!                                          │
//!                                          ├─ ok  ──► commit, clear error
//!                                          └─ err ──► keep value, record error
//! ```
//!
//! Commits can run through a reconciler that sees the value being replaced,
//! which is how snapshot diffing is layered on top. Commits are serialized,
//! so each reconcile sees the value committed just before it. `clear` aborts
//! running refreshes and discards any commit of a fetch started before it.

use crate::{
    config::SwrConfig,
    error::{CacheError, CacheResult},
    memory_cache::MemoryCache,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt::Display,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{task::AbortHandle, time::Instant};
use tracing::{debug, warn};

/// Merges a freshly fetched value with the value it replaces
pub type Reconciler<V> = Arc<dyn Fn(Option<&V>, V) -> V + Send + Sync>;

#[derive(Debug, Clone)]
struct Stored<V> {
    value: V,
    fetched_at: Instant,
}

/// Value served by [`SwrStore::get`]
#[derive(Debug, Clone, PartialEq)]
pub struct SwrResult<V, E> {
    /// Last committed value
    pub value: V,
    /// Whether the value is older than the staleness threshold
    pub is_stale: bool,
    /// Error from the most recent failed refresh, cleared by the next success
    pub error: Option<E>,
    /// Time since the value was fetched
    pub age: Duration,
}

struct Refresh {
    id: u64,
    handle: AbortHandle,
}

struct Inner<V, E> {
    cache: MemoryCache<Stored<V>>,
    config: SwrConfig,
    refreshing: Mutex<HashMap<String, Refresh>>,
    errors: Mutex<HashMap<String, E>>,
    reconciler: Option<Reconciler<V>>,
    // Held from reading the previous value until the new one is stored
    commit_lock: Mutex<()>,
    generation: AtomicU64,
    next_refresh_id: AtomicU64,
}

impl<V: Clone, E> Inner<V, E> {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store `value` unless the store was cleared after `generation`
    ///
    /// Returns the committed value, or hands `value` back untouched when
    /// the commit was discarded.
    fn commit(&self, key: &str, value: V, generation: u64) -> Result<V, V> {
        let _serial = self.commit_lock.lock();
        if self.generation() != generation {
            debug!("discarding commit of {key}, store was cleared");
            return Err(value);
        }

        let previous = self.cache.peek(key).map(|stored| stored.value);
        let value = match &self.reconciler {
            Some(reconcile) => reconcile(previous.as_ref(), value),
            None => value,
        };
        self.cache.set(
            key,
            Stored {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
            self.config.retention,
        );
        self.errors.lock().remove(key);
        Ok(value)
    }

    fn record_error(&self, key: &str, error: E, generation: u64) {
        let _serial = self.commit_lock.lock();
        if self.generation() == generation {
            self.errors.lock().insert(key.to_string(), error);
        }
    }
}

/// Clears the refreshing mark when the background task ends or is aborted
struct RefreshGuard<V, E> {
    inner: Arc<Inner<V, E>>,
    key: String,
    id: u64,
}

impl<V, E> Drop for RefreshGuard<V, E> {
    fn drop(&mut self) {
        let mut refreshing = self.inner.refreshing.lock();
        // After `clear` a newer refresh may own the key
        if refreshing.get(&self.key).is_some_and(|refresh| refresh.id == self.id) {
            refreshing.remove(&self.key);
        }
    }
}

/// Stale-while-revalidate store keyed by string
///
/// Cloning is cheap; clones share storage.
pub struct SwrStore<V, E> {
    inner: Arc<Inner<V, E>>,
}

impl<V, E> Clone for SwrStore<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, E> SwrStore<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Display + Send + Sync + 'static,
{
    /// Create a store
    pub fn new(config: SwrConfig) -> CacheResult<Self> {
        Self::build(config, None)
    }

    /// Create a store whose commits pass through `reconciler`
    pub fn with_reconciler(config: SwrConfig, reconciler: Reconciler<V>) -> CacheResult<Self> {
        Self::build(config, Some(reconciler))
    }

    fn build(config: SwrConfig, reconciler: Option<Reconciler<V>>) -> CacheResult<Self> {
        config
            .validate()
            .map_err(CacheError::InvalidConfiguration)?;
        let cache = MemoryCache::counted(config.backing_cache_config())?;

        Ok(Self {
            inner: Arc::new(Inner {
                cache,
                config,
                refreshing: Mutex::new(HashMap::new()),
                errors: Mutex::new(HashMap::new()),
                reconciler,
                commit_lock: Mutex::new(()),
                generation: AtomicU64::new(0),
                next_refresh_id: AtomicU64::new(0),
            }),
        })
    }

    /// Get the store configuration
    pub fn config(&self) -> &SwrConfig {
        &self.inner.config
    }

    /// Serve `key` using the configured staleness threshold
    pub async fn get<F, Fut>(&self, key: &str, fetcher: F) -> Result<SwrResult<V, E>, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.get_with_max_age(key, self.inner.config.max_age, fetcher)
            .await
    }

    /// Serve `key`, treating values older than `max_age` as stale
    ///
    /// A stale value is returned at once while `fetcher` runs in a spawned
    /// task. With nothing stored, `fetcher` runs in the foreground and its
    /// error is returned.
    pub async fn get_with_max_age<F, Fut>(
        &self,
        key: &str,
        max_age: Duration,
        fetcher: F,
    ) -> Result<SwrResult<V, E>, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if let Some(stored) = self.inner.cache.get(key) {
            let age = Instant::now().saturating_duration_since(stored.fetched_at);
            let is_stale = age > max_age;
            if is_stale {
                self.spawn_refresh(key, fetcher);
            }
            return Ok(SwrResult {
                value: stored.value,
                is_stale,
                error: self.inner.errors.lock().get(key).cloned(),
                age,
            });
        }

        debug!("swr miss for {key}, fetching in foreground");
        let value = self.refresh(key, fetcher).await?;
        Ok(SwrResult {
            value,
            is_stale: false,
            error: None,
            age: Duration::ZERO,
        })
    }

    /// Fetch and commit `key` in the foreground, regardless of age
    ///
    /// If the store is cleared while `fetcher` runs, the fetched value is
    /// returned but not stored.
    pub async fn refresh<F, Fut>(&self, key: &str, fetcher: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let generation = self.inner.generation();
        let value = fetcher().await?;
        match self.inner.commit(key, value, generation) {
            Ok(value) | Err(value) => Ok(value),
        }
    }

    /// Store a value as freshly fetched
    pub fn prime(&self, key: &str, value: V) {
        let _ = self.inner.commit(key, value, self.inner.generation());
    }

    /// Whether a background refresh is running for `key`
    pub fn is_refreshing(&self, key: &str) -> bool {
        self.inner.refreshing.lock().contains_key(key)
    }

    /// Error recorded by the last failed refresh of `key`
    pub fn last_error(&self, key: &str) -> Option<E> {
        self.inner.errors.lock().get(key).cloned()
    }

    /// Drop `key` and any recorded error
    pub fn invalidate(&self, key: &str) {
        self.inner.cache.remove(key);
        self.inner.errors.lock().remove(key);
    }

    /// Drop everything and abort running background refreshes
    ///
    /// Foreground fetches already running still return their value to the
    /// caller, but nothing fetched before the clear is stored.
    pub fn clear(&self) {
        let aborted: Vec<Refresh> = {
            let _serial = self.inner.commit_lock.lock();
            self.inner.generation.fetch_add(1, Ordering::AcqRel);
            self.inner.cache.clear();
            self.inner.errors.lock().clear();
            self.inner.refreshing.lock().drain().map(|(_, refresh)| refresh).collect()
        };
        for refresh in aborted {
            refresh.handle.abort();
        }
    }

    fn spawn_refresh<F, Fut>(&self, key: &str, fetcher: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let mut refreshing = self.inner.refreshing.lock();
        if refreshing.contains_key(key) {
            debug!("refresh already running for {key}");
            return;
        }

        let id = self.inner.next_refresh_id.fetch_add(1, Ordering::Relaxed);
        let generation = self.inner.generation();
        let guard = RefreshGuard {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            id,
        };
        // The task cannot drop its guard before the lock is released
        let task = tokio::spawn(async move {
            match fetcher().await {
                Ok(value) => {
                    if guard.inner.commit(&guard.key, value, generation).is_ok() {
                        debug!("revalidated {}", guard.key);
                    }
                }
                Err(error) => {
                    warn!("background revalidation of {} failed: {error}", guard.key);
                    guard.inner.record_error(&guard.key, error, generation);
                }
            }
            drop(guard);
        });
        refreshing.insert(
            key.to_string(),
            Refresh {
                id,
                handle: task.abort_handle(),
            },
        );
    }
}
