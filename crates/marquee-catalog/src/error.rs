//! Error types for catalog operations
//!
//! Every failure the data layer can produce maps onto one [`CatalogError`]
//! kind. The kind decides three things: whether the retry executor tries
//! again, whether the failure counts against the circuit breaker, and what
//! (if anything) the user is shown.

use std::time::Duration;
use thiserror::Error;

/// Catalog data-layer errors
///
/// `Clone` so one settled outcome can be handed to every coalesced caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Connection or request-level transport failure
    #[error("Network error: {0}")]
    NetworkTransport(String),

    /// An attempt did not settle within the attempt timeout
    #[error("Request timeout after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The caller no longer wants the result
    #[error("Request cancelled")]
    Cancelled,

    /// The circuit breaker refused the attempt
    #[error("Circuit open, retry after {}ms", .retry_after.map_or(0, |d| d.as_millis()))]
    CircuitOpen {
        /// Remaining cooldown when the attempt was refused
        retry_after: Option<Duration>,
    },

    /// The upstream answered with an error status
    #[error("Upstream rejected request with HTTP {status}")]
    UpstreamRejected {
        /// HTTP status code
        status: u16,
        /// Duration from the HTTP Retry-After header, if present
        retry_after: Option<Duration>,
    },

    /// The resource does not exist upstream and nothing is cached
    #[error("Not found: {0}")]
    NotFound(String),

    /// The upstream payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The request cannot be expressed upstream
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CatalogError {
    /// Create an upstream rejection without a Retry-After hint
    pub fn upstream(status: u16) -> Self {
        Self::UpstreamRejected {
            status,
            retry_after: None,
        }
    }

    /// Check if the retry executor should try again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkTransport(_) | Self::Timeout(_) => true,
            Self::UpstreamRejected { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// Check if the failure came from the network attempt itself and should
    /// count against the circuit breaker
    pub fn trips_breaker(&self) -> bool {
        self.is_retryable()
    }

    /// `Cancelled` is never shown to the user
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Message for the user-facing layer, `None` for silent errors
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::Cancelled => None,
            Self::CircuitOpen { .. } => Some("Service degraded, try again shortly."),
            Self::NotFound(_) => Some("We couldn't find that title."),
            _ => Some("Something went wrong. Please try again."),
        }
    }

    /// Get the Retry-After hint duration, if the upstream sent one
    pub fn retry_after_hint(&self) -> Option<Duration> {
        match self {
            Self::UpstreamRejected { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(Duration::ZERO)
        } else if error.is_decode() {
            Self::Decode(error.to_string())
        } else if let Some(status) = error.status() {
            Self::upstream(status.as_u16())
        } else {
            Self::NetworkTransport(error.to_string())
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

impl From<url::ParseError> for CatalogError {
    fn from(error: url::ParseError) -> Self {
        Self::InvalidConfiguration(format!("invalid URL: {error}"))
    }
}

impl From<marquee_cache::CacheError> for CatalogError {
    fn from(error: marquee_cache::CacheError) -> Self {
        Self::InvalidConfiguration(error.to_string())
    }
}

/// Result type alias for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(CatalogError::NetworkTransport("reset".into()).is_retryable());
        assert!(CatalogError::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(CatalogError::upstream(429).is_retryable());
        assert!(CatalogError::upstream(500).is_retryable());
        assert!(CatalogError::upstream(503).is_retryable());

        assert!(!CatalogError::upstream(400).is_retryable());
        assert!(!CatalogError::upstream(401).is_retryable());
        assert!(!CatalogError::NotFound("movie 1".into()).is_retryable());
        assert!(!CatalogError::Decode("eof".into()).is_retryable());
        assert!(!CatalogError::Cancelled.is_retryable());
        assert!(!CatalogError::CircuitOpen { retry_after: None }.is_retryable());
        assert!(!CatalogError::InvalidRequest("bad id".into()).is_retryable());
    }

    #[test]
    fn test_application_errors_do_not_trip_breaker() {
        assert!(CatalogError::Timeout(Duration::ZERO).trips_breaker());
        assert!(!CatalogError::upstream(404).trips_breaker());
        assert!(!CatalogError::Decode("bad json".into()).trips_breaker());
        assert!(!CatalogError::Cancelled.trips_breaker());
    }

    #[test]
    fn test_user_messages() {
        assert!(!CatalogError::Cancelled.is_user_visible());
        assert_eq!(CatalogError::Cancelled.user_message(), None);

        let open = CatalogError::CircuitOpen {
            retry_after: Some(Duration::from_secs(30)),
        };
        let generic = CatalogError::NetworkTransport("refused".into());
        assert!(open.is_user_visible());
        assert_ne!(open.user_message(), generic.user_message());
        assert_eq!(open.to_string(), "Circuit open, retry after 30000ms");
    }

    #[test]
    fn test_retry_after_hint() {
        let limited = CatalogError::UpstreamRejected {
            status: 429,
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(limited.retry_after_hint(), Some(Duration::from_secs(2)));
        assert_eq!(CatalogError::upstream(503).retry_after_hint(), None);
    }

    #[test]
    fn test_json_error_is_decode() {
        let error: CatalogError = serde_json::from_str::<u32>("not json")
            .map_err(CatalogError::from)
            .unwrap_err();
        assert!(matches!(error, CatalogError::Decode(_)));
    }
}
