//! Circuit breaker
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────► Open { until }
//!     ▲                                 │
//!     │ success                         │ can_attempt() and now >= until
//!     │                                 ▼
//!     └──────────────────────────── HalfOpen (one probe)
//!                 success               │
//!                                       │ failure
//!                                       ▼
//!                                  Open { now + cooldown }
//! ```
//!
//! A success in any state closes the breaker and resets the failure count.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a probe
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: std::env::var("MARQUEE_BREAKER_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.failure_threshold),
            cooldown: std::env::var("MARQUEE_BREAKER_COOLDOWN_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.cooldown, Duration::from_secs),
        }
    }

    /// Set failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set cooldown
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Externally visible breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Attempts flow normally
    Closed,
    /// Attempts are refused until the cooldown elapses
    Open,
    /// One probe attempt decides whether to close or reopen
    HalfOpen,
}

/// Breaker status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStatus {
    /// Current state
    pub state: CircuitState,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Remaining cooldown while open
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { probe_in_flight: bool },
}

#[derive(Debug)]
struct State {
    phase: Phase,
    consecutive_failures: u32,
}

/// Failure tracker gating attempts against one endpoint class
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    /// Create a breaker; `name` only appears in logs
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(State {
                phase: Phase::Closed,
                consecutive_failures: 0,
            }),
        }
    }

    /// Get the breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask permission for one attempt
    ///
    /// Not a pure query. When the cooldown has elapsed this moves `Open` to
    /// `HalfOpen` and hands the single probe slot to the caller, so call it
    /// exactly once per attempt and report the outcome with one of the
    /// `record_*` methods. Prefer [`CircuitBreaker::try_acquire`], which
    /// reports an abandoned probe on drop.
    pub fn can_attempt(&self) -> bool {
        self.admit().is_some()
    }

    /// Ask permission for one attempt, returning a permit that settles it
    ///
    /// A permit dropped without a verdict releases the half-open probe slot,
    /// so an attempt future that is dropped mid-flight cannot wedge the
    /// breaker in `HalfOpen`.
    pub fn try_acquire(&self) -> Option<AttemptPermit<'_>> {
        self.admit().map(|probe| AttemptPermit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    /// Admit one attempt; `Some(true)` when it is the half-open probe
    fn admit(&self) -> Option<bool> {
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.phase {
            Phase::Closed => Some(false),
            Phase::Open { until } if now >= until => {
                state.phase = Phase::HalfOpen {
                    probe_in_flight: true,
                };
                info!("circuit {} half-open, allowing probe", self.name);
                Some(true)
            }
            Phase::HalfOpen {
                probe_in_flight: false,
            } => {
                state.phase = Phase::HalfOpen {
                    probe_in_flight: true,
                };
                Some(true)
            }
            Phase::Open { .. }
            | Phase::HalfOpen {
                probe_in_flight: true,
            } => None,
        }
    }

    /// Report a successful attempt
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if !matches!(state.phase, Phase::Closed) {
            info!("circuit {} closed", self.name);
        }
        state.phase = Phase::Closed;
        state.consecutive_failures = 0;
    }

    /// Report a failed network attempt
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        match state.phase {
            Phase::HalfOpen { .. } => {
                state.phase = Phase::Open {
                    until: now + self.config.cooldown,
                };
                warn!("circuit {} probe failed, reopening", self.name);
            }
            Phase::Closed if state.consecutive_failures >= self.config.failure_threshold => {
                state.phase = Phase::Open {
                    until: now + self.config.cooldown,
                };
                warn!(
                    "circuit {} opened after {} consecutive failures",
                    self.name, state.consecutive_failures
                );
            }
            Phase::Closed | Phase::Open { .. } => {}
        }
    }

    /// Release a probe slot whose attempt ended without a verdict
    ///
    /// Used when a half-open probe was cancelled or failed with an error
    /// that says nothing about upstream health.
    pub fn record_abandoned(&self) {
        let mut state = self.state.lock();
        if let Phase::HalfOpen {
            probe_in_flight: true,
        } = state.phase
        {
            state.phase = Phase::HalfOpen {
                probe_in_flight: false,
            };
            debug!("circuit {} probe abandoned", self.name);
        }
    }

    /// Current status
    pub fn status(&self) -> BreakerStatus {
        let now = Instant::now();
        let state = self.state.lock();
        let (circuit_state, retry_after) = match state.phase {
            Phase::Closed => (CircuitState::Closed, None),
            Phase::Open { until } => (
                CircuitState::Open,
                Some(until.saturating_duration_since(now)),
            ),
            Phase::HalfOpen { .. } => (CircuitState::HalfOpen, None),
        };
        BreakerStatus {
            state: circuit_state,
            consecutive_failures: state.consecutive_failures,
            retry_after,
        }
    }

    /// Remaining cooldown, if open
    pub fn retry_after(&self) -> Option<Duration> {
        self.status().retry_after
    }

    /// Force the breaker closed
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.phase = Phase::Closed;
        state.consecutive_failures = 0;
        info!("circuit {} reset", self.name);
    }
}

/// Admission for one attempt, returned by [`CircuitBreaker::try_acquire`]
///
/// Settle it with [`AttemptPermit::success`] or [`AttemptPermit::failure`].
/// Dropping it unsettled counts as abandoned.
#[derive(Debug)]
#[must_use = "dropping the permit abandons the attempt"]
pub struct AttemptPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl AttemptPermit<'_> {
    /// Whether this attempt holds the half-open probe slot
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Report a successful attempt
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    /// Report a failed network attempt
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for AttemptPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.record_abandoned();
        }
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", CircuitBreakerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_transition_cycle() {
        let breaker = breaker();
        for _ in 0..4 {
            assert!(breaker.can_attempt());
            breaker.record_failure();
        }
        assert_eq!(breaker.status().state, CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.status().state, CircuitState::Open);
        assert!(!breaker.can_attempt());

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(!breaker.can_attempt());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(breaker.can_attempt());
        assert_eq!(breaker.status().state, CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(
            breaker.status(),
            BreakerStatus {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                retry_after: None,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_allows_single_probe() {
        let breaker = CircuitBreaker::new(
            "probe",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_cooldown(Duration::from_secs(5)),
        );
        breaker.record_failure();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(breaker.can_attempt());
        assert!(!breaker.can_attempt());

        breaker.record_failure();
        let status = breaker.status();
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.retry_after, Some(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_is_released() {
        let breaker = CircuitBreaker::new(
            "abandon",
            CircuitBreakerConfig::default().with_failure_threshold(1),
        );
        breaker.record_failure();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(breaker.can_attempt());
        breaker.record_abandoned();
        assert_eq!(breaker.status().state, CircuitState::HalfOpen);
        assert!(breaker.can_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_permit_releases_slot() {
        let breaker = CircuitBreaker::new(
            "permit",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_cooldown(Duration::from_secs(1)),
        );
        breaker.record_failure();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let permit = breaker.try_acquire().unwrap();
        assert!(permit.is_probe());
        assert!(breaker.try_acquire().is_none());
        drop(permit);

        assert_eq!(breaker.status().state, CircuitState::HalfOpen);
        let permit = breaker.try_acquire().unwrap();
        permit.success();
        assert_eq!(breaker.status().state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_permit_keeps_verdict() {
        let breaker = CircuitBreaker::new(
            "verdict",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_cooldown(Duration::from_secs(1)),
        );
        let permit = breaker.try_acquire().unwrap();
        assert!(!permit.is_probe());
        permit.failure();
        assert_eq!(breaker.status().state, CircuitState::Open);

        tokio::time::sleep(Duration::from_secs(1)).await;
        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.status().state, CircuitState::Open);
        assert!(breaker.try_acquire().is_none());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = breaker();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.status().consecutive_failures, 0);

        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.status().state, CircuitState::Closed);
    }

    #[test]
    fn test_late_success_while_open_closes() {
        let breaker = CircuitBreaker::new(
            "late",
            CircuitBreakerConfig::default().with_failure_threshold(1),
        );
        breaker.record_failure();
        assert_eq!(breaker.status().state, CircuitState::Open);
        breaker.record_success();
        assert_eq!(breaker.status().state, CircuitState::Closed);
    }

    #[test]
    fn test_reset() {
        let breaker = CircuitBreaker::new(
            "reset",
            CircuitBreakerConfig::default().with_failure_threshold(1),
        );
        breaker.record_failure();
        breaker.reset();
        assert!(breaker.can_attempt());
        assert_eq!(breaker.retry_after(), None);
    }

    #[test]
    fn test_config_from_env_and_validate() {
        unsafe {
            std::env::set_var("MARQUEE_BREAKER_THRESHOLD", "3");
            std::env::set_var("MARQUEE_BREAKER_COOLDOWN_SECS", "15");
        }
        let config = CircuitBreakerConfig::from_env();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.cooldown, Duration::from_secs(15));
        unsafe {
            std::env::remove_var("MARQUEE_BREAKER_THRESHOLD");
            std::env::remove_var("MARQUEE_BREAKER_COOLDOWN_SECS");
        }

        assert!(
            CircuitBreakerConfig::default()
                .with_failure_threshold(0)
                .validate()
                .is_err()
        );
    }
}
