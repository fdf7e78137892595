//! Configuration structures for the catalog client

use marquee_cache::{MemoryCacheConfig, SwrConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::breaker::CircuitBreakerConfig;
use crate::error::{CatalogError, Result};
use crate::quality::QualityConfig;
use crate::retry::RetryPolicy;

/// Catalog client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Catalog API base URL
    pub api_base_url: String,

    /// API key sent as the `api_key` query parameter
    pub api_key: Option<String>,

    /// Response language sent as the `language` query parameter
    pub language: Option<String>,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Transport-level request timeout
    pub request_timeout: Duration,

    /// TTL for list and search pages
    pub page_ttl: Duration,

    /// TTL for single-movie lookups
    pub detail_ttl: Duration,

    /// Byte-bounded LRU cache for pages
    pub page_cache: MemoryCacheConfig,

    /// Count-bounded FIFO cache for single movies
    pub detail_cache: MemoryCacheConfig,

    /// Count-bounded FIFO store for prefetched movies
    pub prefetch_cache: MemoryCacheConfig,

    /// Trending feed staleness and retention
    pub trending: SwrConfig,

    /// Circuit breaker shared by every request
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry policy for failed requests
    pub retry_policy: RetryPolicy,

    /// Asset URL layout
    pub quality: QualityConfig,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.themoviedb.org/3".to_string(),
            api_key: None,
            language: Some("en-US".to_string()),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            page_ttl: Duration::from_secs(5 * 60),
            detail_ttl: Duration::from_secs(10 * 60),
            page_cache: MemoryCacheConfig::advanced(5 * 1024 * 1024), // 5 MB
            detail_cache: MemoryCacheConfig::lightweight(100)
                .with_default_ttl(Duration::from_secs(10 * 60)),
            prefetch_cache: MemoryCacheConfig::lightweight(50)
                .with_default_ttl(Duration::from_secs(10 * 60)),
            trending: SwrConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry_policy: RetryPolicy::default(),
            quality: QualityConfig::default(),
        }
    }
}

impl CatalogConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            api_base_url: std::env::var("MARQUEE_API_URL").unwrap_or(defaults.api_base_url),
            api_key: std::env::var("MARQUEE_API_KEY").ok().or(defaults.api_key),
            language: std::env::var("MARQUEE_LANGUAGE").ok().or(defaults.language),
            connect_timeout: env_secs("MARQUEE_CONNECT_TIMEOUT").unwrap_or(defaults.connect_timeout),
            request_timeout: env_secs("MARQUEE_REQUEST_TIMEOUT").unwrap_or(defaults.request_timeout),
            page_ttl: env_secs("MARQUEE_PAGE_TTL").unwrap_or(defaults.page_ttl),
            detail_ttl: env_secs("MARQUEE_DETAIL_TTL").unwrap_or(defaults.detail_ttl),
            page_cache: std::env::var("MARQUEE_PAGE_CACHE_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.page_cache, MemoryCacheConfig::advanced),
            detail_cache: std::env::var("MARQUEE_DETAIL_CACHE_ENTRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.detail_cache, MemoryCacheConfig::lightweight),
            prefetch_cache: defaults.prefetch_cache,
            trending: SwrConfig {
                max_age: env_secs("MARQUEE_TRENDING_MAX_AGE").unwrap_or(defaults.trending.max_age),
                ..defaults.trending
            },
            circuit_breaker: CircuitBreakerConfig::from_env(),
            retry_policy: RetryPolicy::from_env(),
            quality: QualityConfig {
                image_base_url: std::env::var("MARQUEE_IMAGE_URL")
                    .unwrap_or(defaults.quality.image_base_url),
                ..defaults.quality
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    ///
    /// Missing fields take their default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CatalogError::InvalidConfiguration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            CatalogError::InvalidConfiguration(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = CatalogError::InvalidConfiguration;

        url::Url::parse(&self.api_base_url)?;
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout must be greater than 0".to_string()));
        }
        self.page_cache
            .validate()
            .map_err(|e| invalid(format!("page_cache: {e}")))?;
        self.detail_cache
            .validate()
            .map_err(|e| invalid(format!("detail_cache: {e}")))?;
        self.prefetch_cache
            .validate()
            .map_err(|e| invalid(format!("prefetch_cache: {e}")))?;
        self.trending
            .validate()
            .map_err(|e| invalid(format!("trending: {e}")))?;
        self.circuit_breaker
            .validate()
            .map_err(|e| invalid(format!("circuit_breaker: {e}")))?;
        self.retry_policy
            .validate()
            .map_err(|e| invalid(format!("retry_policy: {e}")))?;
        Ok(())
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
#[allow(unsafe_code, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = CatalogConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.page_cache.max_size_bytes, Some(5 * 1024 * 1024));
        assert_eq!(config.detail_cache.max_entries, Some(100));
    }

    #[test]
    fn test_from_env() {
        unsafe {
            std::env::set_var("MARQUEE_API_KEY", "env-key");
            std::env::set_var("MARQUEE_DETAIL_CACHE_ENTRIES", "25");
        }
        let config = CatalogConfig::from_env().unwrap();
        assert_eq!(config.api_key.as_deref(), Some("env-key"));
        assert_eq!(config.detail_cache.max_entries, Some(25));
        unsafe {
            std::env::remove_var("MARQUEE_API_KEY");
            std::env::remove_var("MARQUEE_DETAIL_CACHE_ENTRIES");
        }
    }

    #[test]
    fn test_from_json_file_with_partial_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"api_base_url": "http://localhost:8080/3", "api_key": "abc",
                "retry_policy": {{"max_attempts": 5,
                    "initial_delay": {{"secs": 0, "nanos": 100000000}},
                    "max_delay": {{"secs": 2, "nanos": 0}},
                    "attempt_timeout": {{"secs": 1, "nanos": 0}},
                    "jitter_factor": 0.1}}}}"#
        )
        .unwrap();

        let config = CatalogConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8080/3");
        assert_eq!(config.api_key.as_deref(), Some("abc"));
        assert_eq!(config.retry_policy.max_attempts, 5);
        assert_eq!(config.retry_policy.initial_delay, Duration::from_millis(100));
        assert_eq!(config.language.as_deref(), Some("en-US"));
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"api_base_url": "not a url"}}"#).unwrap();
        assert!(matches!(
            CatalogConfig::from_json_file(file.path()),
            Err(CatalogError::InvalidConfiguration(_))
        ));

        assert!(CatalogConfig::from_json_file("/nonexistent/marquee.json").is_err());
    }
}
