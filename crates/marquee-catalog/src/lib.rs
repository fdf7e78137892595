//! # marquee-catalog - Resilient Movie Catalog Data Layer
//!
//! This crate sits between a user interface and a remote movie catalog API.
//! It turns an unreliable JSON service into a small set of operations that
//! coalesce overlapping requests, retry transient failures, stop hammering a
//! failing upstream, and serve cached data whenever it can.
//!
//! ## Architecture Overview
//!
//! 1. **Catalog Client** ([`CatalogClient`]): composition root exposing
//!    popular pages, search, lookups by id, trending and prefetching
//! 2. **Resilience Layer**: [`RequestDeduplicator`], [`RetryExecutor`] and a
//!    shared [`CircuitBreaker`]
//! 3. **Storage Layer**: bounded TTL caches and the stale-while-revalidate
//!    store from `marquee-cache`
//! 4. **Presentation Helpers**: [`QualitySelector`] picks asset sizes from
//!    the latest network signal
//!
//! ## Failure Handling
//!
//! - Network errors, timeouts, HTTP 429 and 5xx are retried with
//!   exponential backoff and jitter
//! - Only those failures count against the circuit breaker
//! - `NotFound`, decode errors and other 4xx statuses fail immediately
//! - [`CatalogError::Cancelled`] is never meant for display; see
//!   [`CatalogError::user_message`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use marquee_catalog::{CancellationToken, CatalogClient, CatalogConfig, MovieId, TrendingWindow};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CatalogClient::new(CatalogConfig::from_env()?)?;
//!     let cancel = CancellationToken::new();
//!
//!     let popular = client.fetch_page(1, &cancel).await?;
//!     for movie in &popular.items {
//!         println!("{} ({}) {:.1}", movie.title, movie.year, movie.rating);
//!     }
//!
//!     // Warm the detail view for the first result
//!     if let Some(first) = popular.items.first() {
//!         client.prefetch_by_id(first.id.clone(), &cancel);
//!     }
//!
//!     let movie = client.fetch_by_id(&MovieId::from(603), &cancel).await?;
//!     println!("{}: {:?}", movie.title, movie.asset_url);
//!
//!     let trending = client.fetch_trending(TrendingWindow::Week, &cancel).await?;
//!     println!("{} new this refresh", trending.new_item_ids.len());
//!
//!     println!("{}", serde_json::to_string_pretty(&client.metrics())?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::return_self_not_must_use)] // Builder patterns
#![allow(clippy::module_name_repetitions)]

pub mod breaker;
pub mod cancel;
pub mod client;
pub mod config;
pub mod dedup;
pub mod error;
pub mod model;
pub mod prefetch;
pub mod quality;
pub mod query;
pub mod retry;
pub mod transport;
pub mod trending;

// Re-export main types
pub use breaker::{AttemptPermit, BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use cancel::CancellationToken;
pub use client::{CatalogClient, CatalogMetrics};
pub use config::CatalogConfig;
pub use dedup::RequestDeduplicator;
pub use error::{CatalogError, Result};
pub use model::{Movie, MovieId, MoviePage};
pub use prefetch::{PrefetchManager, PrefetchOutcome};
pub use quality::{NetworkQuality, QualityConfig, QualitySelector, QualityTier};
pub use query::{CatalogQuery, CatalogRequest, TrendingWindow};
pub use retry::{Backoff, RetryExecutor, RetryPolicy};
pub use transport::{CatalogTransport, HttpTransport};
pub use trending::{TrendingFeed, TrendingSnapshot};

// Re-export storage types used in configuration and metrics
pub use marquee_cache::{CacheStats, EvictionPolicy, MemoryCacheConfig, SwrConfig};
