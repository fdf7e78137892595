//! Logical catalog queries, upstream requests and cache keys
//!
//! Every cache key in the client comes from [`CatalogQuery::cache_key`]:
//! the endpoint path followed by its parameters sorted by name. Two query
//! shapes can only collide if they hit the same endpoint with the same
//! parameters.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::error::CatalogError;
use crate::model::MovieId;

/// Trending aggregation window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendingWindow {
    /// Last 24 hours
    #[default]
    Day,
    /// Last 7 days
    Week,
}

impl TrendingWindow {
    /// Path segment for this window
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
        }
    }
}

impl fmt::Display for TrendingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrendingWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            other => Err(format!("unknown trending window: {other}")),
        }
    }
}

/// A logical request the client can serve
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CatalogQuery {
    /// Popular movies, one page
    Popular {
        /// 1-based page
        page: u32,
    },
    /// Free-text search, one page
    Search {
        /// Search text as typed
        query: String,
        /// 1-based page
        page: u32,
    },
    /// One movie by id
    Details {
        /// Movie identifier
        id: MovieId,
    },
    /// Trending movies for a window
    Trending {
        /// Aggregation window
        window: TrendingWindow,
    },
}

impl CatalogQuery {
    /// Details query for `id`
    ///
    /// The id becomes one path segment and part of the cache key, so ids
    /// that are empty or carry path, query or fragment syntax are rejected.
    pub fn details(id: &MovieId) -> Result<Self, CatalogError> {
        let text = id.as_str();
        let rejected = matches!(text, "" | "." | "..")
            || text.chars().any(|c| {
                matches!(c, '/' | '\\' | '?' | '&' | '#' | '%') || c.is_whitespace() || c.is_control()
            });
        if rejected {
            return Err(CatalogError::InvalidRequest(format!("invalid movie id: {text:?}")));
        }
        Ok(Self::Details { id: id.clone() })
    }

    /// Upstream endpoint path, relative to the API base URL
    pub fn endpoint(&self) -> String {
        match self {
            Self::Popular { .. } => "movie/popular".to_string(),
            Self::Search { .. } => "search/movie".to_string(),
            Self::Details { id } => format!("movie/{id}"),
            Self::Trending { window } => format!("trending/movie/{window}"),
        }
    }

    /// Query parameters sent upstream
    pub fn params(&self) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();
        match self {
            Self::Popular { page } => {
                params.insert("page", page.to_string());
            }
            Self::Search { query, page } => {
                params.insert("query", query.trim().to_string());
                params.insert("page", page.to_string());
            }
            Self::Details { .. } | Self::Trending { .. } => {}
        }
        params
    }

    /// Deterministic cache key: endpoint plus sorted parameters
    ///
    /// Search text is trimmed and lowercased so equivalent searches share
    /// one entry.
    pub fn cache_key(&self) -> String {
        let mut params = self.params();
        if let Some(query) = params.get_mut("query") {
            *query = query.to_lowercase();
        }

        let endpoint = self.endpoint();
        if params.is_empty() {
            return endpoint;
        }

        let encoded: Vec<String> = params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        format!("{endpoint}?{}", encoded.join("&"))
    }

    /// Upstream request for this query
    pub fn request(&self) -> CatalogRequest {
        CatalogRequest {
            path: self.endpoint(),
            params: self
                .params()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }
}

/// Transport-level request: a relative path and query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRequest {
    /// Path relative to the API base URL
    pub path: String,
    /// Query parameters, excluding credentials
    pub params: Vec<(String, String)>,
}
