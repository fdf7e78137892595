//! Request coalescing
//!
//! Concurrent callers asking for the same key share one in-flight
//! operation. The map only holds a weak handle to that operation, so the
//! callers own it: when the last interested caller settles or cancels, the
//! operation (and any timer inside it) is dropped and its entry removed.

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use crate::cancel::CancellationToken;
use crate::error::{CatalogError, Result};

type SharedOperation<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Pending<T> {
    id: u64,
    operation: Option<WeakShared<BoxFuture<'static, Result<T>>>>,
}

type PendingMap<T> = Arc<DashMap<String, Pending<T>>>;

/// Removes the pending entry when the shared operation settles or is dropped
struct PendingGuard<T> {
    pending: PendingMap<T>,
    key: String,
    id: u64,
}

impl<T> Drop for PendingGuard<T> {
    fn drop(&mut self) {
        // A newer operation may already own the key after `clear`
        if self
            .pending
            .remove_if(&self.key, |_, pending| pending.id == self.id)
            .is_some()
        {
            trace!("pending request {} settled", self.key);
        }
    }
}

/// Coalesces concurrent requests for the same key into one operation
pub struct RequestDeduplicator<T> {
    pending: PendingMap<T>,
    next_id: AtomicU64,
}

impl<T> Default for RequestDeduplicator<T> {
    fn default() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> std::fmt::Debug for RequestDeduplicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty deduplicator
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `factory`'s operation for `key`, or join the one already running
    ///
    /// Every caller joined to one operation receives the same outcome.
    /// `cancel` only detaches this caller; the operation is dropped once no
    /// caller is left waiting on it.
    pub async fn coalesce<F, Fut>(
        &self,
        key: &str,
        cancel: &CancellationToken,
        factory: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }

        let operation = match self.pending.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if let Some(existing) = occupied
                    .get()
                    .operation
                    .as_ref()
                    .and_then(WeakShared::upgrade)
                {
                    debug!("joining in-flight request for {key}");
                    existing
                } else {
                    let (pending, operation) = self.start(key, factory);
                    occupied.insert(pending);
                    operation
                }
            }
            Entry::Vacant(vacant) => {
                let (pending, operation) = self.start(key, factory);
                vacant.insert(pending);
                operation
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("caller detached from {key}");
                Err(CatalogError::Cancelled)
            }
            result = operation => result,
        }
    }

    fn start<F, Fut>(&self, key: &str, factory: F) -> (Pending<T>, SharedOperation<T>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            key: key.to_string(),
            id,
        };
        let inner = factory();
        let operation = async move {
            let _guard = guard;
            inner.await
        }
        .boxed()
        .shared();

        (
            Pending {
                id,
                operation: operation.downgrade(),
            },
            operation,
        )
    }

    /// Whether an operation is in flight for `key`
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Keys with an operation in flight, sorted
    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Forget all in-flight operations
    ///
    /// Callers already waiting keep their operation; the next caller for any
    /// key starts fresh work.
    pub fn clear(&self) {
        self.pending.clear();
    }
}
