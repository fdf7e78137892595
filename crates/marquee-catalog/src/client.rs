//! # Catalog Client
//!
//! [`CatalogClient`] is the composition root of the data layer. It owns every
//! cache, the deduplicators, the retry executor and its circuit breaker, the
//! quality selector, the prefetch store and the trending feed, and it is the
//! only place cache keys are built.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ CatalogClient                                        │
//! │ ┌──────────────┐ ┌──────────────┐ ┌───────────────┐  │
//! │ │ page cache   │ │ detail cache │ │ trending SWR  │  │
//! │ │ (LRU, bytes) │ │ (FIFO, count)│ │ (diffing)     │  │
//! │ └──────────────┘ └──────────────┘ └───────────────┘  │
//! │ ┌──────────────────────────────┐ ┌───────────────┐   │
//! │ │ RequestDeduplicator (per key)│ │ Prefetch store│   │
//! │ └──────────────────────────────┘ └───────────────┘   │
//! │ ┌──────────────────────────────────────────────────┐ │
//! │ │ RetryExecutor ── CircuitBreaker (shared)         │ │
//! │ └──────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────┘
//!                      │
//!              CatalogTransport (HTTP)
//! ```
//!
//! ## Lookup Order
//!
//! 1. **Cache**: a live entry is returned without touching the network
//! 2. **Prefetch store** (details only): a speculative result is promoted
//! 3. **Coalesced fetch**: one retried upstream request per key, shared by
//!    every concurrent caller
//!
//! Cached movies never carry an asset URL. It is resolved from the current
//! quality tier each time a movie is handed out.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use marquee_catalog::{CancellationToken, CatalogClient, CatalogConfig, CatalogError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CatalogError> {
//!     let client = CatalogClient::new(CatalogConfig::from_env()?)?;
//!     let cancel = CancellationToken::new();
//!
//!     let page = client.fetch_page(1, &cancel).await?;
//!     println!("{} of {} pages", page.current_page, page.total_pages);
//!
//!     match client.search("blade runner", 1, &cancel).await {
//!         Ok(results) => println!("{} results", results.items.len()),
//!         Err(e) => {
//!             if let Some(message) = e.user_message() {
//!                 eprintln!("{message}");
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use marquee_cache::{CacheStats, MemoryCache};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::breaker::{BreakerStatus, CircuitBreaker};
use crate::cancel::CancellationToken;
use crate::config::CatalogConfig;
use crate::dedup::RequestDeduplicator;
use crate::error::{CatalogError, Result};
use crate::model::{ApiMovie, ApiPage, Movie, MovieId, MoviePage};
use crate::prefetch::{PrefetchManager, PrefetchOutcome};
use crate::quality::{QualitySelector, QualityTier};
use crate::query::{CatalogQuery, CatalogRequest, TrendingWindow};
use crate::retry::RetryExecutor;
use crate::transport::{CatalogTransport, HttpTransport};
use crate::trending::{TrendingFeed, TrendingSnapshot, TrendingStore, trending_store};

/// Point-in-time view of the client's health and caches
#[derive(Debug, Clone, Serialize)]
pub struct CatalogMetrics {
    /// Shared circuit breaker
    pub circuit_breaker: BreakerStatus,
    /// List and search pages
    pub page_cache: CacheStats,
    /// Single-movie lookups
    pub detail_cache: CacheStats,
    /// Speculatively fetched movies
    pub prefetch_cache: CacheStats,
    /// Cache keys with a request in flight, sorted
    pub pending_keys: Vec<String>,
}

struct ClientInner {
    config: CatalogConfig,
    transport: Arc<dyn CatalogTransport>,
    executor: RetryExecutor,
    page_cache: MemoryCache<MoviePage>,
    detail_cache: MemoryCache<Movie>,
    page_requests: RequestDeduplicator<MoviePage>,
    detail_requests: RequestDeduplicator<Movie>,
    prefetch: PrefetchManager<Movie>,
    trending: TrendingStore,
    quality: QualitySelector,
    // Bumped by `clear_all`; fetches started earlier do not write back
    generation: AtomicU64,
}

impl ClientInner {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Write `value` unless `clear_all` ran since `generation` was read
    fn cache_if_current<V: Clone>(
        &self,
        cache: &MemoryCache<V>,
        generation: u64,
        key: String,
        value: V,
        ttl: Duration,
    ) {
        if self.generation() == generation {
            cache.set(key, value, ttl);
        } else {
            debug!("dropping result for {key}, caches were cleared");
        }
    }

    async fn fetch_decoded<T: DeserializeOwned>(&self, request: &CatalogRequest) -> Result<T> {
        let body = self.transport.fetch(request).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Retried upstream fetch of one page
    ///
    /// Runs inside a coalesced operation, so it is not tied to any one
    /// caller's token; it stops when the last waiter drops it.
    async fn fetch_page_upstream(&self, query: &CatalogQuery) -> Result<MoviePage> {
        let request = query.request();
        let detached = CancellationToken::new();
        let page: ApiPage = self
            .executor
            .execute(&detached, || self.fetch_decoded(&request))
            .await?;
        Ok(MoviePage::from(page))
    }

    /// Retried upstream fetch of one movie, run inside a coalesced operation
    async fn fetch_movie_upstream(&self, query: &CatalogQuery) -> Result<Movie> {
        let request = query.request();
        let detached = CancellationToken::new();
        let movie: ApiMovie = self
            .executor
            .execute(&detached, || self.fetch_decoded(&request))
            .await?;
        Ok(Movie::from(movie))
    }

    fn with_asset_url(&self, mut movie: Movie) -> Movie {
        movie.asset_url = movie
            .poster_path
            .as_deref()
            .and_then(|fragment| self.quality.resolve(fragment, None));
        movie
    }

    fn with_asset_urls(&self, mut page: MoviePage) -> MoviePage {
        page.items = page
            .items
            .into_iter()
            .map(|movie| self.with_asset_url(movie))
            .collect();
        page
    }
}

/// Resilient catalog client
///
/// Cloning is cheap; clones share every cache, the breaker and the
/// deduplication bookkeeping.
#[derive(Clone)]
pub struct CatalogClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogClient")
            .field("api_base_url", &self.inner.config.api_base_url)
            .field("page_cache", &self.inner.page_cache)
            .field("detail_cache", &self.inner.detail_cache)
            .field("breaker", self.inner.executor.breaker())
            .finish_non_exhaustive()
    }
}

impl CatalogClient {
    /// Create a client talking HTTP to the configured API
    pub fn new(config: CatalogConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client over any transport
    pub fn with_transport(config: CatalogConfig, transport: Arc<dyn CatalogTransport>) -> Result<Self> {
        config.validate()?;

        let breaker = Arc::new(CircuitBreaker::new("catalog", config.circuit_breaker.clone()));
        let executor = RetryExecutor::new(config.retry_policy.clone(), breaker);

        let inner = ClientInner {
            page_cache: MemoryCache::with_json_estimator(config.page_cache.clone())?,
            detail_cache: MemoryCache::counted(config.detail_cache.clone())?,
            page_requests: RequestDeduplicator::new(),
            detail_requests: RequestDeduplicator::new(),
            prefetch: PrefetchManager::new(config.prefetch_cache.clone())?,
            trending: trending_store(config.trending.clone())?,
            quality: QualitySelector::new(config.quality.clone()),
            executor,
            transport,
            config,
            generation: AtomicU64::new(0),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Get the client configuration
    pub fn config(&self) -> &CatalogConfig {
        &self.inner.config
    }

    /// Quality selector, for feeding network signals and subscribing to tier changes
    pub fn quality(&self) -> &QualitySelector {
        &self.inner.quality
    }

    /// One page of popular movies
    pub async fn fetch_page(&self, page: u32, cancel: &CancellationToken) -> Result<MoviePage> {
        self.load_page(CatalogQuery::Popular { page }, cancel).await
    }

    /// One page of search results
    ///
    /// A blank query resolves to an empty page without any network attempt.
    pub async fn search(&self, query: &str, page: u32, cancel: &CancellationToken) -> Result<MoviePage> {
        if query.trim().is_empty() {
            trace!("blank search, returning empty page");
            return Ok(MoviePage::empty(page));
        }
        self.load_page(
            CatalogQuery::Search {
                query: query.to_string(),
                page,
            },
            cancel,
        )
        .await
    }

    async fn load_page(&self, query: CatalogQuery, cancel: &CancellationToken) -> Result<MoviePage> {
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }

        let key = query.cache_key();
        if let Some(page) = self.inner.page_cache.get(&key) {
            trace!("page cache hit for {key}");
            return Ok(self.inner.with_asset_urls(page));
        }

        let inner = Arc::clone(&self.inner);
        let cache_key = key.clone();
        let generation = self.inner.generation();
        let page = self
            .inner
            .page_requests
            .coalesce(&key, cancel, move || async move {
                let page = inner.fetch_page_upstream(&query).await?;
                inner.cache_if_current(
                    &inner.page_cache,
                    generation,
                    cache_key,
                    page.clone(),
                    inner.config.page_ttl,
                );
                Ok(page)
            })
            .await?;

        Ok(self.inner.with_asset_urls(page))
    }

    /// One movie by id
    ///
    /// Checks the detail cache, then the prefetch store, then the upstream.
    /// Fails with `NotFound` when the upstream has no such movie and with
    /// `InvalidRequest` for an id that cannot form a request path.
    pub async fn fetch_by_id(&self, id: &MovieId, cancel: &CancellationToken) -> Result<Movie> {
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }

        let query = CatalogQuery::details(id)?;
        let key = query.cache_key();
        if let Some(movie) = self.inner.detail_cache.get(&key) {
            trace!("detail cache hit for {key}");
            return Ok(self.inner.with_asset_url(movie));
        }
        if let Some(movie) = self.inner.prefetch.get_prefetched(id.as_str()) {
            debug!("serving {id} from prefetch store");
            self.inner.detail_cache.set(&key, movie.clone(), self.inner.config.detail_ttl);
            return Ok(self.inner.with_asset_url(movie));
        }

        let inner = Arc::clone(&self.inner);
        let cache_key = key.clone();
        let generation = self.inner.generation();
        let movie = self
            .inner
            .detail_requests
            .coalesce(&key, cancel, move || async move {
                let movie = inner.fetch_movie_upstream(&query).await?;
                inner.cache_if_current(
                    &inner.detail_cache,
                    generation,
                    cache_key,
                    movie.clone(),
                    inner.config.detail_ttl,
                );
                Ok(movie)
            })
            .await?;

        Ok(self.inner.with_asset_url(movie))
    }

    /// Speculatively fetch a movie in a background task
    ///
    /// The returned handle may be ignored. Failures are logged and never
    /// surface. Prefetches share the retry executor, the circuit breaker and
    /// the per-id request coalescing with regular lookups, so a prefetch and
    /// a [`CatalogClient::fetch_by_id`] for the same id make one upstream
    /// request between them.
    pub fn prefetch_by_id(&self, id: MovieId, cancel: &CancellationToken) -> JoinHandle<PrefetchOutcome> {
        let inner = Arc::clone(&self.inner);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let query = match CatalogQuery::details(&id) {
                Ok(query) => query,
                Err(error) => {
                    debug!("prefetch of {id} skipped: {error}");
                    return PrefetchOutcome::Failed;
                }
            };
            let key = query.cache_key();
            if inner.detail_cache.has(&key) {
                trace!("prefetch of {id} skipped, already cached");
                return PrefetchOutcome::AlreadyCached;
            }

            let fetch_inner = Arc::clone(&inner);
            inner
                .prefetch
                .prefetch(id.as_str(), &cancel, || {
                    inner.detail_requests.coalesce(&key, &cancel, move || async move {
                        fetch_inner.fetch_movie_upstream(&query).await
                    })
                })
                .await
        })
    }

    /// Trending movies for `window`
    ///
    /// Served stale-while-revalidate: an old snapshot comes back at once,
    /// tagged stale, while a background refresh runs. `new_item_ids` lists
    /// ids that arrived with the latest refresh.
    pub async fn fetch_trending(
        &self,
        window: TrendingWindow,
        cancel: &CancellationToken,
    ) -> Result<TrendingFeed> {
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }

        let query = CatalogQuery::Trending { window };
        let key = query.cache_key();
        let inner = Arc::clone(&self.inner);
        let request_key = key.clone();
        let fetcher = move || async move {
            let fetch_inner = Arc::clone(&inner);
            let page = inner
                .page_requests
                .coalesce(&request_key, &CancellationToken::new(), move || async move {
                    fetch_inner.fetch_page_upstream(&query).await
                })
                .await?;
            Ok(TrendingSnapshot::new(page.items))
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CatalogError::Cancelled),
            result = self.inner.trending.get(&key, fetcher) => result?,
        };

        let mut feed = TrendingFeed::from(result);
        feed.items = feed
            .items
            .into_iter()
            .map(|movie| self.inner.with_asset_url(movie))
            .collect();
        Ok(feed)
    }

    /// Absolute asset URL for a path fragment
    ///
    /// Uses the current quality tier unless `tier_override` is given.
    pub fn resolve_asset_url(&self, fragment: &str, tier_override: Option<QualityTier>) -> Option<String> {
        self.inner.quality.resolve(fragment, tier_override)
    }

    /// Cached movie without a network call or cache statistics
    pub fn cached_movie(&self, id: &MovieId) -> Option<Movie> {
        let key = CatalogQuery::details(id).ok()?.cache_key();
        self.inner
            .detail_cache
            .peek(&key)
            .map(|movie| self.inner.with_asset_url(movie))
    }

    /// Breaker, cache and in-flight request snapshot
    pub fn metrics(&self) -> CatalogMetrics {
        let mut pending_keys = self.inner.page_requests.pending_keys();
        pending_keys.extend(self.inner.detail_requests.pending_keys());
        pending_keys.sort();

        CatalogMetrics {
            circuit_breaker: self.breaker_status(),
            page_cache: self.inner.page_cache.stats(),
            detail_cache: self.inner.detail_cache.stats(),
            prefetch_cache: self.inner.prefetch.stats(),
            pending_keys,
        }
    }

    /// Circuit breaker status
    pub fn breaker_status(&self) -> BreakerStatus {
        self.inner.executor.breaker().status()
    }

    /// Force the circuit breaker closed
    pub fn reset_breaker(&self) {
        self.inner.executor.breaker().reset();
    }

    /// Drop every cache, the deduplication bookkeeping, the prefetch store
    /// and the trending snapshots
    ///
    /// Requests already in flight still answer their callers but no longer
    /// write into the caches. The circuit breaker keeps its state.
    pub fn clear_all(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.page_cache.clear();
        self.inner.detail_cache.clear();
        self.inner.page_requests.clear();
        self.inner.detail_requests.clear();
        self.inner.prefetch.clear();
        self.inner.trending.clear();
        info!("catalog caches cleared");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::breaker::{CircuitBreakerConfig, CircuitState};
    use crate::quality::NetworkQuality;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use bytes::Bytes;
    use marquee_cache::SwrConfig;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Handler = Box<dyn Fn(&CatalogRequest, usize) -> Result<Bytes> + Send + Sync>;

    /// Answers from a closure that sees the request and the call number
    struct ScriptedTransport {
        handler: Handler,
        latency: Duration,
        calls: AtomicUsize,
        paths: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(handler: impl Fn(&CatalogRequest, usize) -> Result<Bytes> + Send + Sync + 'static) -> Arc<Self> {
            Self::slow(Duration::ZERO, handler)
        }

        fn slow(
            latency: Duration,
            handler: impl Fn(&CatalogRequest, usize) -> Result<Bytes> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                handler: Box::new(handler),
                latency,
                calls: AtomicUsize::new(0),
                paths: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CatalogTransport for ScriptedTransport {
        async fn fetch(&self, request: &CatalogRequest) -> Result<Bytes> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.paths.lock().push(request.path.clone());
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            (self.handler)(request, call)
        }
    }

    fn page_body(ids: &[u64]) -> Bytes {
        let results: Vec<String> = ids
            .iter()
            .map(|id| {
                format!(
                    r#"{{"id": {id}, "title": "Movie {id}", "poster_path": "/p{id}.jpg",
                        "vote_average": 7.0, "release_date": "2001-01-01"}}"#
                )
            })
            .collect();
        Bytes::from(format!(
            r#"{{"page": 1, "total_pages": 4, "results": [{}]}}"#,
            results.join(",")
        ))
    }

    fn movie_body(id: &str) -> Bytes {
        Bytes::from(format!(
            r#"{{"id": {id}, "title": "Movie {id}", "poster_path": "/m{id}.jpg",
                "vote_average": 8.0, "release_date": "1999-10-15"}}"#
        ))
    }

    fn config() -> CatalogConfig {
        CatalogConfig {
            retry_policy: RetryPolicy::default()
                .with_delays(Duration::from_millis(10), Duration::from_millis(100))
                .with_jitter_factor(0.0),
            ..CatalogConfig::default()
        }
    }

    fn client(transport: Arc<ScriptedTransport>) -> CatalogClient {
        CatalogClient::with_transport(config(), transport).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_page_is_cached() {
        let transport = ScriptedTransport::new(|_, _| Ok(page_body(&[1, 2])));
        let client = client(Arc::clone(&transport));
        let cancel = CancellationToken::new();

        let first = client.fetch_page(1, &cancel).await.unwrap();
        let second = client.fetch_page(1, &cancel).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.total_pages, 4);
        assert_eq!(transport.calls(), 1);
        assert_eq!(client.metrics().page_cache.hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_search_makes_no_request() {
        let transport = ScriptedTransport::new(|_, _| Ok(page_body(&[1])));
        let client = client(Arc::clone(&transport));

        let page = client.search("   ", 1, &CancellationToken::new()).await.unwrap();
        assert_eq!(page, MoviePage::empty(1));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_equivalent_searches_share_cache_entry() {
        let transport = ScriptedTransport::new(|_, _| Ok(page_body(&[7])));
        let client = client(Arc::clone(&transport));
        let cancel = CancellationToken::new();

        client.search("Alien", 1, &cancel).await.unwrap();
        client.search(" alien", 1, &cancel).await.unwrap();
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_are_coalesced() {
        let transport = ScriptedTransport::new(|request, _| {
            Ok(movie_body(request.path.trim_start_matches("movie/")))
        });
        let client = client(Arc::clone(&transport));
        let cancel = CancellationToken::new();
        let id = MovieId::from(603);

        let (a, b, c) = tokio::join!(
            client.fetch_by_id(&id, &cancel),
            client.fetch_by_id(&id, &cancel),
            client.fetch_by_id(&id, &cancel),
        );
        assert_eq!(a.as_ref().unwrap().title, "Movie 603");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(transport.calls(), 1);
        assert!(client.metrics().pending_keys.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let transport = ScriptedTransport::new(|request, _| Err(CatalogError::NotFound(request.path.clone())));
        let client = client(Arc::clone(&transport));

        let error = client
            .fetch_by_id(&MovieId::from(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(error, CatalogError::NotFound("movie/1".to_string()));
        assert_eq!(transport.calls(), 1);
        assert_eq!(client.breaker_status().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let transport = ScriptedTransport::new(|_, call| {
            if call == 0 {
                Err(CatalogError::upstream(503))
            } else {
                Ok(page_body(&[1]))
            }
        });
        let client = client(Arc::clone(&transport));

        let page = client.fetch_page(2, &CancellationToken::new()).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(transport.calls(), 2);
        assert_eq!(client.breaker_status().state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_and_refuses_without_network() {
        let transport = ScriptedTransport::new(|_, _| Err(CatalogError::upstream(500)));
        let config = CatalogConfig {
            circuit_breaker: CircuitBreakerConfig::default().with_failure_threshold(2),
            retry_policy: RetryPolicy::default().with_max_attempts(1),
            ..CatalogConfig::default()
        };
        let client = CatalogClient::with_transport(config, transport.clone()).unwrap();
        let cancel = CancellationToken::new();

        for page in 1..=2 {
            let error = client.fetch_page(page, &cancel).await.unwrap_err();
            assert_eq!(error, CatalogError::upstream(500));
        }
        assert_eq!(client.breaker_status().state, CircuitState::Open);

        let refused = client.fetch_page(3, &cancel).await.unwrap_err();
        assert!(matches!(refused, CatalogError::CircuitOpen { .. }));
        assert_eq!(refused.user_message(), Some("Service degraded, try again shortly."));
        assert_eq!(transport.calls(), 2);

        client.clear_all();
        assert_eq!(client.breaker_status().state, CircuitState::Open);
        client.reset_breaker();
        assert_eq!(client.breaker_status().state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_gets_cancelled() {
        let transport = ScriptedTransport::new(|_, _| Ok(page_body(&[1])));
        let client = client(Arc::clone(&transport));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = client.fetch_page(1, &cancel).await.unwrap_err();
        assert_eq!(error, CatalogError::Cancelled);
        assert!(!error.is_user_visible());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_feeds_detail_lookup() {
        let transport = ScriptedTransport::new(|request, _| {
            Ok(movie_body(request.path.trim_start_matches("movie/")))
        });
        let client = client(Arc::clone(&transport));
        let cancel = CancellationToken::new();
        let id = MovieId::from(78);

        let outcome = client.prefetch_by_id(id.clone(), &cancel).await.unwrap();
        assert_eq!(outcome, PrefetchOutcome::Stored);

        let movie = client.fetch_by_id(&id, &cancel).await.unwrap();
        assert_eq!(movie.title, "Movie 78");
        assert_eq!(transport.calls(), 1);

        let again = client.prefetch_by_id(id.clone(), &cancel).await.unwrap();
        assert_eq!(again, PrefetchOutcome::AlreadyCached);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_failure_is_silent() {
        let transport = ScriptedTransport::new(|_, _| Err(CatalogError::upstream(401)));
        let client = client(Arc::clone(&transport));

        let outcome = client
            .prefetch_by_id(MovieId::from(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, PrefetchOutcome::Failed);
        assert_eq!(client.metrics().prefetch_cache.entry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_asset_url_follows_current_tier() {
        let transport = ScriptedTransport::new(|_, _| Ok(movie_body("11")));
        let client = client(Arc::clone(&transport));
        let cancel = CancellationToken::new();
        let id = MovieId::from(11);

        let hd = client.fetch_by_id(&id, &cancel).await.unwrap();
        assert_eq!(
            hd.asset_url.as_deref(),
            Some("https://image.tmdb.org/t/p/w780/m11.jpg")
        );

        client.quality().update(Some(NetworkQuality::Low));
        let compressed = client.fetch_by_id(&id, &cancel).await.unwrap();
        assert_eq!(
            compressed.asset_url.as_deref(),
            Some("https://image.tmdb.org/t/p/w185/m11.jpg")
        );
        assert_eq!(transport.calls(), 1);

        assert_eq!(
            client.resolve_asset_url("/m11.jpg", Some(QualityTier::Standard)).as_deref(),
            Some("https://image.tmdb.org/t/p/w342/m11.jpg")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_trending_reports_new_items_after_refresh() {
        let transport = ScriptedTransport::new(|_, call| {
            Ok(if call == 0 {
                page_body(&[1, 2, 3])
            } else {
                page_body(&[2, 3, 4])
            })
        });
        let config = CatalogConfig {
            trending: SwrConfig::new().with_max_age(Duration::from_millis(100)),
            ..config()
        };
        let client = CatalogClient::with_transport(config, transport.clone()).unwrap();
        let cancel = CancellationToken::new();

        let first = client.fetch_trending(TrendingWindow::Day, &cancel).await.unwrap();
        assert_eq!(first.items.len(), 3);
        assert!(first.new_item_ids.is_empty());
        assert!(!first.is_stale);

        tokio::time::sleep(Duration::from_millis(150)).await;
        let stale = client.fetch_trending(TrendingWindow::Day, &cancel).await.unwrap();
        assert!(stale.is_stale);
        assert_eq!(stale.items.len(), 3);

        tokio::time::sleep(Duration::from_millis(1)).await;
        let refreshed = client.fetch_trending(TrendingWindow::Day, &cancel).await.unwrap();
        assert!(!refreshed.is_stale);
        assert_eq!(refreshed.new_item_ids, vec![MovieId::from(4)]);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_forces_refetch() {
        let transport = ScriptedTransport::new(|_, _| Ok(page_body(&[1])));
        let client = client(Arc::clone(&transport));
        let cancel = CancellationToken::new();

        client.fetch_page(1, &cancel).await.unwrap();
        client.clear_all();
        client.fetch_page(1, &cancel).await.unwrap();
        assert_eq!(transport.calls(), 2);
        assert_eq!(transport.paths.lock().as_slice(), ["movie/popular", "movie/popular"]);
    }

    /// Breaker with threshold 1 that has just entered its cooldown
    async fn tripped_client(transport: Arc<ScriptedTransport>) -> CatalogClient {
        let config = CatalogConfig {
            circuit_breaker: CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_cooldown(Duration::from_secs(1)),
            retry_policy: RetryPolicy::default().with_max_attempts(1),
            ..CatalogConfig::default()
        };
        let client = CatalogClient::with_transport(config, transport).unwrap();
        let error = client.fetch_page(1, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(error, CatalogError::upstream(500));
        assert_eq!(client.breaker_status().state, CircuitState::Open);
        client
    }

    fn fails_first_then_slow_pages() -> Arc<ScriptedTransport> {
        ScriptedTransport::slow(Duration::from_millis(100), |_, call| {
            if call == 0 {
                Err(CatalogError::upstream(500))
            } else {
                Ok(page_body(&[1]))
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_page_probe_does_not_wedge_breaker() {
        let transport = fails_first_then_slow_pages();
        let client = tripped_client(Arc::clone(&transport)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let error = client.fetch_page(2, &cancel).await.unwrap_err();
        assert_eq!(error, CatalogError::Cancelled);
        assert_eq!(client.breaker_status().state, CircuitState::HalfOpen);

        tokio::time::sleep(Duration::from_secs(600)).await;
        let page = client.fetch_page(3, &CancellationToken::new()).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(client.breaker_status().state, CircuitState::Closed);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_prefetch_probe_does_not_wedge_breaker() {
        let transport = ScriptedTransport::slow(Duration::from_millis(100), |request, call| {
            if call == 0 {
                Err(CatalogError::upstream(500))
            } else if request.path.starts_with("movie/") && request.path != "movie/popular" {
                Ok(movie_body(request.path.trim_start_matches("movie/")))
            } else {
                Ok(page_body(&[1]))
            }
        });
        let client = tripped_client(Arc::clone(&transport)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let cancel = CancellationToken::new();
        let prefetch = client.prefetch_by_id(MovieId::from(7), &cancel);
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert_eq!(prefetch.await.unwrap(), PrefetchOutcome::Cancelled);
        assert_eq!(client.breaker_status().state, CircuitState::HalfOpen);

        let movie = client
            .fetch_by_id(&MovieId::from(7), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(movie.title, "Movie 7");
        assert_eq!(client.breaker_status().state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_joins_running_prefetch() {
        let transport = ScriptedTransport::slow(Duration::from_millis(100), |request, _| {
            Ok(movie_body(request.path.trim_start_matches("movie/")))
        });
        let client = client(Arc::clone(&transport));
        let cancel = CancellationToken::new();
        let id = MovieId::from(7);

        let prefetch = client.prefetch_by_id(id.clone(), &cancel);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let movie = client.fetch_by_id(&id, &cancel).await.unwrap();

        assert_eq!(movie.title, "Movie 7");
        assert_eq!(prefetch.await.unwrap(), PrefetchOutcome::Stored);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_joins_running_lookup() {
        let transport = ScriptedTransport::slow(Duration::from_millis(100), |request, _| {
            Ok(movie_body(request.path.trim_start_matches("movie/")))
        });
        let client = client(Arc::clone(&transport));
        let cancel = CancellationToken::new();
        let id = MovieId::from(8);

        let lookup = {
            let client = client.clone();
            let id = id.clone();
            tokio::spawn(async move { client.fetch_by_id(&id, &CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let outcome = client.prefetch_by_id(id.clone(), &cancel).await.unwrap();

        assert_eq!(outcome, PrefetchOutcome::Stored);
        assert_eq!(lookup.await.unwrap().unwrap().title, "Movie 8");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_discards_in_flight_results() {
        let transport = ScriptedTransport::slow(Duration::from_millis(100), |request, _| {
            if request.path == "movie/popular" {
                Ok(page_body(&[1]))
            } else {
                Ok(movie_body(request.path.trim_start_matches("movie/")))
            }
        });
        let client = client(Arc::clone(&transport));
        let id = MovieId::from(7);

        let lookup = {
            let client = client.clone();
            let id = id.clone();
            tokio::spawn(async move { client.fetch_by_id(&id, &CancellationToken::new()).await })
        };
        let listing = {
            let client = client.clone();
            tokio::spawn(async move { client.fetch_page(1, &CancellationToken::new()).await })
        };
        let prefetch = client.prefetch_by_id(MovieId::from(9), &CancellationToken::new());
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.clear_all();

        assert_eq!(lookup.await.unwrap().unwrap().title, "Movie 7");
        assert_eq!(listing.await.unwrap().unwrap().items.len(), 1);
        assert_eq!(prefetch.await.unwrap(), PrefetchOutcome::Discarded);

        assert_eq!(client.cached_movie(&id), None);
        let metrics = client.metrics();
        assert_eq!(metrics.page_cache.entry_count, 0);
        assert_eq!(metrics.detail_cache.entry_count, 0);
        assert_eq!(metrics.prefetch_cache.entry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_id_with_url_syntax_is_rejected() {
        let transport = ScriptedTransport::new(|_, _| Ok(page_body(&[1])));
        let client = client(Arc::clone(&transport));
        let id = MovieId::from("popular?page=1");

        let error = client
            .fetch_by_id(&id, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, CatalogError::InvalidRequest(_)));
        assert_eq!(
            client.prefetch_by_id(id.clone(), &CancellationToken::new()).await.unwrap(),
            PrefetchOutcome::Failed
        );
        assert_eq!(client.cached_movie(&id), None);
        assert_eq!(transport.calls(), 0);
    }
}
