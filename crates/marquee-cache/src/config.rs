//! Cache configuration structures
//!
//! Each cache type has its own configuration with sensible defaults,
//! builder-style setters and validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which live entry gets evicted first when a bound is hit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Oldest inserted entry first; reads do not affect order
    Fifo,
    /// Least recently accessed entry first
    #[default]
    Lru,
}

/// Memory cache configuration
///
/// At least one of `max_entries` or `max_size_bytes` must be set; an
/// unbounded cache is rejected by [`MemoryCacheConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    /// Maximum number of entries (None for unlimited)
    pub max_entries: Option<usize>,
    /// Maximum estimated payload size in bytes (None for unlimited)
    pub max_size_bytes: Option<usize>,
    /// TTL used by [`crate::MemoryCache::set_default`]
    pub default_ttl: Duration,
    /// Eviction policy when a bound is reached
    pub eviction_policy: EvictionPolicy,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: None,
            max_size_bytes: Some(5 * 1024 * 1024), // 5 MB
            default_ttl: Duration::from_secs(5 * 60),
            eviction_policy: EvictionPolicy::Lru,
        }
    }
}

impl MemoryCacheConfig {
    /// Create a new memory cache configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Count-bounded FIFO cache for small, cheap payloads
    pub fn lightweight(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            max_size_bytes: None,
            default_ttl: Duration::from_secs(5 * 60),
            eviction_policy: EvictionPolicy::Fifo,
        }
    }

    /// Byte-bounded LRU cache for larger payloads
    pub fn advanced(max_size_bytes: usize) -> Self {
        Self {
            max_entries: None,
            max_size_bytes: Some(max_size_bytes),
            default_ttl: Duration::from_secs(5 * 60),
            eviction_policy: EvictionPolicy::Lru,
        }
    }

    /// Set maximum number of entries
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Set maximum estimated size
    pub fn with_max_size_bytes(mut self, max_size_bytes: usize) -> Self {
        self.max_size_bytes = Some(max_size_bytes);
        self
    }

    /// Set default TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set eviction policy
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries.is_none() && self.max_size_bytes.is_none() {
            return Err("either max_entries or max_size_bytes must be set".to_string());
        }

        if self.max_entries == Some(0) {
            return Err("max_entries must be greater than 0".to_string());
        }

        if self.max_size_bytes == Some(0) {
            return Err("max_size_bytes must be greater than 0".to_string());
        }

        if self.default_ttl.is_zero() {
            return Err("default_ttl must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Stale-while-revalidate store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwrConfig {
    /// Age after which a served value is tagged stale and refreshed
    pub max_age: Duration,
    /// Hard lifetime of a stored value; past this it is dropped entirely
    pub retention: Duration,
    /// Maximum number of distinct keys held
    pub max_entries: usize,
}

impl Default for SwrConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(5 * 60),
            retention: Duration::from_secs(24 * 3600),
            max_entries: 32,
        }
    }
}

impl SwrConfig {
    /// Create a new stale-while-revalidate configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the staleness threshold
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Set the hard retention period
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }

        if self.retention < self.max_age {
            return Err("retention must not be shorter than max_age".to_string());
        }

        Ok(())
    }

    pub(crate) fn backing_cache_config(&self) -> MemoryCacheConfig {
        MemoryCacheConfig::lightweight(self.max_entries).with_default_ttl(self.retention)
    }
}
