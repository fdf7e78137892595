//! Upstream wire types and the normalized movie model

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Opaque movie identifier
///
/// The upstream sends numbers, other sources send strings. Both are kept as
/// text and compared by equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MovieId(String);

impl MovieId {
    /// Create an identifier from any displayable value
    pub fn new(id: impl fmt::Display) -> Self {
        Self(id.to_string())
    }

    /// Identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MovieId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<u64> for MovieId {
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl From<&str> for MovieId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for MovieId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(u64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Number(n) => Self::new(n),
            RawId::Text(s) => Self(s),
        })
    }
}

/// One movie as sent by the upstream
#[derive(Debug, Clone, Deserialize)]
pub struct ApiMovie {
    /// Upstream identifier
    pub id: MovieId,
    /// Display title; TV entries in mixed feeds use `name`
    #[serde(alias = "name", default)]
    pub title: String,
    /// Poster path fragment
    #[serde(default)]
    pub poster_path: Option<String>,
    /// Rating on a 0-10 scale
    #[serde(default)]
    pub vote_average: f64,
    /// `YYYY-MM-DD` or empty
    #[serde(alias = "first_air_date", default)]
    pub release_date: Option<String>,
}

/// One page of upstream results
#[derive(Debug, Clone, Deserialize)]
pub struct ApiPage {
    /// 1-based page number
    #[serde(default = "first_page")]
    pub page: u32,
    /// Items on this page, in relevance order
    #[serde(default)]
    pub results: Vec<ApiMovie>,
    /// Total pages available upstream
    #[serde(default)]
    pub total_pages: u32,
}

fn first_page() -> u32 {
    1
}

/// Year shown when the release date is missing or malformed
pub const UNKNOWN_YEAR: &str = "N/A";

/// Normalized movie
///
/// `asset_url` is derived from `poster_path` with the quality tier current
/// when the movie is handed out; cached copies never carry it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    /// Opaque identifier
    pub id: MovieId,
    /// Display title
    pub title: String,
    /// Four-digit release year or [`UNKNOWN_YEAR`]
    pub year: String,
    /// Rating on a 0-5 scale, one decimal
    pub rating: f64,
    /// Raw poster path fragment
    pub poster_path: Option<String>,
    /// Absolute poster URL for the current tier
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub asset_url: Option<String>,
}

impl From<ApiMovie> for Movie {
    fn from(api: ApiMovie) -> Self {
        Self {
            id: api.id,
            title: api.title,
            year: release_year(api.release_date.as_deref()),
            rating: normalize_rating(api.vote_average),
            poster_path: api.poster_path.filter(|path| !path.trim().is_empty()),
            asset_url: None,
        }
    }
}

/// Page of normalized movies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoviePage {
    /// Movies in upstream order
    pub items: Vec<Movie>,
    /// Total pages available upstream
    pub total_pages: u32,
    /// Page these items belong to
    pub current_page: u32,
}

impl MoviePage {
    /// Page with no items and no pages, returned for blank searches
    pub fn empty(current_page: u32) -> Self {
        Self {
            items: Vec::new(),
            total_pages: 0,
            current_page,
        }
    }
}

impl From<ApiPage> for MoviePage {
    fn from(page: ApiPage) -> Self {
        Self {
            items: page.results.into_iter().map(Movie::from).collect(),
            total_pages: page.total_pages,
            current_page: page.page,
        }
    }
}

/// First four characters of a release date when they are all digits
pub fn release_year(release_date: Option<&str>) -> String {
    release_date
        .and_then(|date| date.get(..4))
        .filter(|year| year.bytes().all(|b| b.is_ascii_digit()))
        .map_or_else(|| UNKNOWN_YEAR.to_string(), str::to_string)
}

/// Halve a 0-10 rating, round to one decimal and clamp to 0-5
pub fn normalize_rating(vote_average: f64) -> f64 {
    if !vote_average.is_finite() {
        return 0.0;
    }
    ((vote_average / 2.0) * 10.0).round().clamp(0.0, 50.0) / 10.0
}
