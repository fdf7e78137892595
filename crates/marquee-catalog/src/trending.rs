//! Trending feed on top of the stale-while-revalidate store
//!
//! Each committed snapshot is diffed against the one it replaces. Ids that
//! were not in the preceding snapshot are reported as new until the next
//! refresh lands.

use marquee_cache::{Reconciler, SwrConfig, SwrResult, SwrStore};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CatalogError, Result};
use crate::model::{Movie, MovieId};

/// One committed trending result set
#[derive(Debug, Clone, PartialEq)]
pub struct TrendingSnapshot {
    /// Movies in relevance order
    pub items: Vec<Movie>,
    /// Ids absent from the preceding snapshot
    pub new_item_ids: Vec<MovieId>,
}

impl TrendingSnapshot {
    /// Snapshot with nothing marked new
    pub fn new(items: Vec<Movie>) -> Self {
        Self {
            items,
            new_item_ids: Vec::new(),
        }
    }
}

/// Ids in `next` that do not appear in `previous`, in `next` order
pub fn diff_new_ids(previous: &[Movie], next: &[Movie]) -> Vec<MovieId> {
    let seen: HashSet<&MovieId> = previous.iter().map(|movie| &movie.id).collect();
    next.iter()
        .filter(|movie| !seen.contains(&movie.id))
        .map(|movie| movie.id.clone())
        .collect()
}

/// SWR store specialised for trending snapshots
pub type TrendingStore = SwrStore<TrendingSnapshot, CatalogError>;

/// Create a trending store whose commits compute `new_item_ids`
///
/// The first snapshot for a key has no predecessor and reports nothing new.
pub fn trending_store(config: SwrConfig) -> Result<TrendingStore> {
    let reconciler: Reconciler<TrendingSnapshot> = Arc::new(
        |previous: Option<&TrendingSnapshot>, next: TrendingSnapshot| {
            let new_item_ids = previous
                .map(|previous| diff_new_ids(&previous.items, &next.items))
                .unwrap_or_default();
            TrendingSnapshot {
                new_item_ids,
                ..next
            }
        },
    );
    Ok(SwrStore::with_reconciler(config, reconciler)?)
}

/// Trending result handed to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendingFeed {
    /// Movies in relevance order
    pub items: Vec<Movie>,
    /// Ids that arrived with the latest refresh
    pub new_item_ids: Vec<MovieId>,
    /// Whether the snapshot is older than the staleness threshold
    pub is_stale: bool,
    /// Message from the last failed background refresh
    pub last_error: Option<String>,
    /// Time since the snapshot was fetched
    pub fetched_at_age: Duration,
}

impl From<SwrResult<TrendingSnapshot, CatalogError>> for TrendingFeed {
    fn from(result: SwrResult<TrendingSnapshot, CatalogError>) -> Self {
        Self {
            items: result.value.items,
            new_item_ids: result.value.new_item_ids,
            is_stale: result.is_stale,
            last_error: result.error.map(|error| error.to_string()),
            fetched_at_age: result.age,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn movies(ids: &[u64]) -> Vec<Movie> {
        ids.iter()
            .map(|&id| Movie {
                id: MovieId::from(id),
                title: format!("Movie {id}"),
                year: "2024".to_string(),
                rating: 3.5,
                poster_path: None,
                asset_url: None,
            })
            .collect()
    }

    #[test]
    fn test_diff_new_ids() {
        assert_eq!(
            diff_new_ids(&movies(&[1, 2, 3]), &movies(&[2, 3, 4])),
            vec![MovieId::from(4)]
        );
        assert_eq!(
            diff_new_ids(&movies(&[1]), &movies(&[9, 1, 8])),
            vec![MovieId::from(9), MovieId::from(8)]
        );
        assert!(diff_new_ids(&movies(&[1, 2]), &movies(&[2, 1])).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_diffs_against_previous_snapshot() {
        let store = trending_store(SwrConfig::default()).unwrap();

        let first = store
            .refresh("trending/movie/day", || async {
                Ok(TrendingSnapshot::new(movies(&[1, 2, 3])))
            })
            .await
            .unwrap();
        assert!(first.new_item_ids.is_empty());

        let second = store
            .refresh("trending/movie/day", || async {
                Ok(TrendingSnapshot::new(movies(&[2, 3, 4])))
            })
            .await
            .unwrap();
        assert_eq!(second.new_item_ids, vec![MovieId::from(4)]);

        let third = store
            .refresh("trending/movie/day", || async {
                Ok(TrendingSnapshot::new(movies(&[2, 3, 4])))
            })
            .await
            .unwrap();
        assert!(third.new_item_ids.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_are_diffed_separately() {
        let store = trending_store(SwrConfig::default()).unwrap();
        store.prime("trending/movie/day", TrendingSnapshot::new(movies(&[1])));

        let week = store
            .refresh("trending/movie/week", || async {
                Ok(TrendingSnapshot::new(movies(&[5])))
            })
            .await
            .unwrap();
        assert!(week.new_item_ids.is_empty());
    }

    #[test]
    fn test_feed_carries_error_message() {
        let feed = TrendingFeed::from(SwrResult {
            value: TrendingSnapshot::new(movies(&[1])),
            is_stale: true,
            error: Some(CatalogError::upstream(503)),
            age: Duration::from_secs(400),
        });
        assert!(feed.is_stale);
        assert_eq!(
            feed.last_error.as_deref(),
            Some("Upstream rejected request with HTTP 503")
        );
    }
}
