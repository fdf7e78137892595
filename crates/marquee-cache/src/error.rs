//! Error types for cache operations

use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Invalid cache configuration
    #[error("Invalid cache configuration: {0}")]
    InvalidConfiguration(String),

    /// A revalidation fetch failed; carries the fetcher's rendered error
    #[error("Revalidation failed for {key}: {reason}")]
    RevalidationFailed {
        /// Cache key being refreshed
        key: String,
        /// Display form of the underlying error
        reason: String,
    },
}

impl CacheError {
    /// Create a revalidation failure error
    pub fn revalidation_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RevalidationFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
