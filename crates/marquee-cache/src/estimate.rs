//! Payload size estimators
//!
//! Byte-bounded caches need an approximate size for every value. The
//! estimator is supplied per cache so each call site can pick a proxy that
//! fits its payload type.

use serde::Serialize;
use std::sync::Arc;

/// Approximate size of a value in bytes
pub type SizeEstimator<V> = Arc<dyn Fn(&V) -> usize + Send + Sync>;

/// Multiplier applied to serialized length, approximating two bytes per
/// UTF-16 code unit
pub const JSON_SIZE_MULTIPLIER: usize = 2;

/// Estimate size as `serde_json` serialized length times [`JSON_SIZE_MULTIPLIER`]
///
/// Values that fail to serialize are estimated at zero bytes.
pub fn json_size_estimator<V: Serialize>() -> SizeEstimator<V> {
    Arc::new(|value: &V| {
        serde_json::to_vec(value)
            .map(|bytes| bytes.len() * JSON_SIZE_MULTIPLIER)
            .unwrap_or(0)
    })
}

/// Count every value as one unit, for caches bounded by entry count only
pub fn unit_size_estimator<V>() -> SizeEstimator<V> {
    Arc::new(|_: &V| 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Poster {
        id: u32,
        path: &'static str,
    }

    #[test]
    fn test_json_estimator_doubles_serialized_length() {
        let estimate = json_size_estimator::<Poster>();
        let poster = Poster {
            id: 7,
            path: "/a.jpg",
        };
        let serialized = serde_json::to_vec(&poster).map(|v| v.len()).unwrap_or(0);
        assert_eq!(estimate(&poster), serialized * 2);
    }

    #[test]
    fn test_json_estimator_is_monotonic_in_payload() {
        let estimate = json_size_estimator::<String>();
        assert!(estimate(&"a".repeat(10)) < estimate(&"a".repeat(100)));
    }

    #[test]
    fn test_unit_estimator() {
        let estimate = unit_size_estimator::<Vec<u8>>();
        assert_eq!(estimate(&vec![0; 4096]), 1);
    }
}
