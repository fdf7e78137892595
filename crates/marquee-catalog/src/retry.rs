//! Retry executor with exponential backoff, attempt timeouts and a
//! circuit breaker gate

use rand::{RngExt, rng};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::cancel::CancellationToken;
use crate::error::{CatalogError, Result};

/// Retry policy for failed requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Time allowed for one attempt
    pub attempt_timeout: Duration,

    /// Jitter as a fraction of the doubled delay, 0.0 disables it
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(10),
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Create retry policy from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: std::env::var("MARQUEE_RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_attempts),
            initial_delay: std::env::var("MARQUEE_RETRY_INITIAL_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.initial_delay, Duration::from_millis),
            max_delay: std::env::var("MARQUEE_RETRY_MAX_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.max_delay, Duration::from_millis),
            attempt_timeout: std::env::var("MARQUEE_ATTEMPT_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.attempt_timeout, Duration::from_millis),
            jitter_factor: std::env::var("MARQUEE_RETRY_JITTER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.jitter_factor),
        }
    }

    /// Set total attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set initial and maximum delay
    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    /// Set per-attempt timeout
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Set jitter factor
    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Validate the policy
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        if self.initial_delay > self.max_delay {
            return Err("initial_delay must not exceed max_delay".to_string());
        }
        if self.attempt_timeout.is_zero() {
            return Err("attempt_timeout must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err("jitter_factor must be within 0.0..=1.0".to_string());
        }
        Ok(())
    }
}

/// Delay schedule between attempts
///
/// Yields `initial_delay` first, then `min(previous * 2 + jitter, max_delay)`
/// with jitter drawn from `0..jitter_factor * previous * 2`. The sequence
/// never decreases.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max_delay: Duration,
    jitter_factor: f64,
}

impl Backoff {
    /// Start a schedule for `policy`
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            next: policy.initial_delay.min(policy.max_delay),
            max_delay: policy.max_delay,
            jitter_factor: policy.jitter_factor,
        }
    }

    /// Take the next delay and advance the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        let doubled = delay.saturating_mul(2);
        let jitter = if self.jitter_factor > 0.0 {
            doubled.mul_f64(rng().random_range(0.0..self.jitter_factor))
        } else {
            Duration::ZERO
        };
        self.next = doubled.saturating_add(jitter).min(self.max_delay);
        delay
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

/// Runs one logical operation with retries, guarded by a circuit breaker
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl RetryExecutor {
    /// Create an executor sharing `breaker`
    pub fn new(policy: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self { policy, breaker }
    }

    /// Get the retry policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Get the shared circuit breaker
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Execute `operation` with retry logic
    ///
    /// Each attempt first asks the breaker for permission; a refusal fails
    /// with `CircuitOpen` without spending the attempt. The attempt then
    /// races the attempt timeout and `cancel`. Only network-class failures
    /// are reported to the breaker. Cancellation drops the in-flight attempt
    /// or backoff timer and returns `Cancelled`. Dropping the returned future
    /// mid-attempt releases a half-open probe slot it holds.
    pub async fn execute<F, Fut, T>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = Backoff::new(&self.policy);
        let mut attempt = 0;

        loop {
            attempt += 1;

            if cancel.is_cancelled() {
                return Err(CatalogError::Cancelled);
            }
            let Some(permit) = self.breaker.try_acquire() else {
                debug!("circuit open, refusing attempt {attempt}");
                return Err(CatalogError::CircuitOpen {
                    retry_after: self.breaker.retry_after(),
                });
            };

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(CatalogError::Cancelled),
                result = tokio::time::timeout(self.policy.attempt_timeout, operation()) => {
                    result.unwrap_or(Err(CatalogError::Timeout(self.policy.attempt_timeout)))
                }
            };

            let error = match outcome {
                Ok(value) => {
                    permit.success();
                    return Ok(value);
                }
                Err(error) => error,
            };

            // Any other outcome drops the permit unsettled
            if error.trips_breaker() {
                permit.failure();
            } else {
                drop(permit);
            }

            if !error.is_retryable() || attempt >= max_attempts {
                return Err(error);
            }

            let mut delay = backoff.next_delay();
            if let Some(hint) = error.retry_after_hint()
                && hint <= self.policy.max_delay
            {
                delay = delay.max(hint);
            }
            warn!("Attempt {attempt}/{max_attempts} failed: {error}, retrying in {delay:?}");

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CatalogError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
#[allow(
    unsafe_code,
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::significant_drop_tightening
)]
mod tests {
    use super::*;
    use crate::breaker::{CircuitBreakerConfig, CircuitState};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn executor(policy: RetryPolicy) -> RetryExecutor {
        RetryExecutor::new(
            policy,
            Arc::new(CircuitBreaker::new("test", CircuitBreakerConfig::default())),
        )
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_delays(Duration::from_millis(10), Duration::from_millis(100))
            .with_jitter_factor(0.0)
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(300));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(10));
        assert!((policy.jitter_factor - 0.3).abs() < f64::EPSILON);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_from_env_custom_values() {
        unsafe {
            std::env::set_var("MARQUEE_RETRY_MAX_ATTEMPTS", "5");
            std::env::set_var("MARQUEE_RETRY_INITIAL_DELAY_MS", "200");
            std::env::set_var("MARQUEE_RETRY_JITTER", "0");
        }

        let policy = RetryPolicy::from_env();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(200));
        assert!(policy.jitter_factor.abs() < f64::EPSILON);

        unsafe {
            std::env::remove_var("MARQUEE_RETRY_MAX_ATTEMPTS");
            std::env::remove_var("MARQUEE_RETRY_INITIAL_DELAY_MS");
            std::env::remove_var("MARQUEE_RETRY_JITTER");
        }
    }

    #[test]
    fn test_backoff_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delays: Vec<Duration> = Backoff::new(&policy).take(8).collect();
            assert_eq!(delays[0], Duration::from_millis(300));
            for pair in delays.windows(2) {
                assert!(pair[1] >= pair[0]);
                assert!(pair[1] <= pair[0].mul_f64(2.0 * 1.3));
                assert!(pair[1] <= policy.max_delay);
            }
        }
    }

    #[test]
    fn test_backoff_without_jitter_doubles_to_cap() {
        let policy = fast_policy();
        let delays: Vec<u128> = Backoff::new(&policy)
            .take(5)
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 100]);
    }

    #[tokio::test]
    async fn test_execute_success_on_first_try() {
        let executor = executor(fast_policy());
        let call_count = Arc::new(Mutex::new(0));
        let call_count_clone = Arc::clone(&call_count);

        let result = executor
            .execute(&CancellationToken::new(), || async {
                *call_count_clone.lock().unwrap() += 1;
                Ok::<i32, CatalogError>(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(*call_count.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_retries_and_observes_backoff() {
        let executor = executor(RetryPolicy::default().with_max_attempts(4));
        let started = Arc::new(Mutex::new(Vec::new()));
        let started_clone = Arc::clone(&started);

        let result = executor
            .execute(&CancellationToken::new(), || async {
                let mut started = started_clone.lock().unwrap();
                started.push(Instant::now());
                if started.len() < 4 {
                    Err(CatalogError::NetworkTransport("reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);

        let started = started.lock().unwrap();
        let delays: Vec<Duration> = started.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(delays.len(), 3);
        assert!(delays[0] >= Duration::from_millis(300));
        assert!(delays[0] < Duration::from_millis(302));
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
            assert!(pair[1] <= pair[0].mul_f64(2.0 * 1.3) + Duration::from_millis(2));
        }
        assert_eq!(executor.breaker().status().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_execute_fail_on_non_retryable_error() {
        let executor = executor(fast_policy());
        let call_count = Arc::new(Mutex::new(0));
        let call_count_clone = Arc::clone(&call_count);

        let result = executor
            .execute(&CancellationToken::new(), || async {
                *call_count_clone.lock().unwrap() += 1;
                Err::<i32, CatalogError>(CatalogError::upstream(404))
            })
            .await;

        assert_eq!(result.unwrap_err(), CatalogError::upstream(404));
        assert_eq!(*call_count.lock().unwrap(), 1);
        assert_eq!(executor.breaker().status().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_exhausts_attempts_with_last_error() {
        let executor = executor(fast_policy());
        let call_count = Arc::new(Mutex::new(0));
        let call_count_clone = Arc::clone(&call_count);

        let result = executor
            .execute(&CancellationToken::new(), || async {
                let mut count = call_count_clone.lock().unwrap();
                *count += 1;
                Err::<i32, CatalogError>(CatalogError::upstream(500 + *count))
            })
            .await;

        assert_eq!(result.unwrap_err(), CatalogError::upstream(503));
        assert_eq!(*call_count.lock().unwrap(), 3);
        assert_eq!(executor.breaker().status().consecutive_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retryable() {
        let executor = executor(
            fast_policy()
                .with_max_attempts(2)
                .with_attempt_timeout(Duration::from_millis(50)),
        );

        let result = executor
            .execute(&CancellationToken::new(), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            })
            .await;

        assert_eq!(
            result.unwrap_err(),
            CatalogError::Timeout(Duration::from_millis(50))
        );
        assert_eq!(executor.breaker().status().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_refuses_without_attempt() {
        let breaker = Arc::new(CircuitBreaker::new(
            "open",
            CircuitBreakerConfig::default().with_failure_threshold(1),
        ));
        breaker.record_failure();
        let executor = RetryExecutor::new(fast_policy(), Arc::clone(&breaker));

        let call_count = Arc::new(Mutex::new(0));
        let call_count_clone = Arc::clone(&call_count);
        let result = executor
            .execute(&CancellationToken::new(), || async {
                *call_count_clone.lock().unwrap() += 1;
                Ok(1)
            })
            .await;

        assert!(matches!(result, Err(CatalogError::CircuitOpen { .. })));
        assert_eq!(*call_count.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retries() {
        let executor = executor(
            RetryPolicy::default().with_delays(Duration::from_secs(5), Duration::from_secs(10)),
        );
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let call_count = Arc::new(Mutex::new(0));
        let call_count_clone = Arc::clone(&call_count);
        let start = Instant::now();
        let result = executor
            .execute(&cancel, || async {
                *call_count_clone.lock().unwrap() += 1;
                Err::<i32, CatalogError>(CatalogError::NetworkTransport("down".into()))
            })
            .await;

        assert_eq!(result.unwrap_err(), CatalogError::Cancelled);
        assert_eq!(*call_count.lock().unwrap(), 1);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_releases_half_open_slot() {
        let breaker = Arc::new(CircuitBreaker::new(
            "probe",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_cooldown(Duration::from_secs(1)),
        ));
        breaker.record_failure();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let executor = RetryExecutor::new(fast_policy(), Arc::clone(&breaker));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = executor
            .execute(&cancel, || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(1)
            })
            .await;

        assert_eq!(result.unwrap_err(), CatalogError::Cancelled);
        assert_eq!(breaker.status().state, CircuitState::HalfOpen);
        assert!(breaker.can_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_execution_releases_half_open_slot() {
        let breaker = Arc::new(CircuitBreaker::new(
            "dropped",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_cooldown(Duration::from_secs(1)),
        ));
        breaker.record_failure();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let executor = RetryExecutor::new(fast_policy(), Arc::clone(&breaker));
        let never_cancelled = CancellationToken::new();
        let dropped = tokio::time::timeout(
            Duration::from_millis(10),
            executor.execute(&never_cancelled, || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(1)
            }),
        )
        .await;
        assert!(dropped.is_err());
        assert_eq!(breaker.status().state, CircuitState::HalfOpen);

        let result = executor
            .execute(&never_cancelled, || async { Ok(2) })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(breaker.status().state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_extends_delay() {
        let executor = executor(fast_policy().with_max_attempts(2));
        let started = Arc::new(Mutex::new(Vec::new()));
        let started_clone = Arc::clone(&started);

        let _ = executor
            .execute(&CancellationToken::new(), || async {
                started_clone.lock().unwrap().push(Instant::now());
                Err::<i32, CatalogError>(CatalogError::UpstreamRejected {
                    status: 429,
                    retry_after: Some(Duration::from_millis(80)),
                })
            })
            .await;

        let started = started.lock().unwrap();
        assert_eq!(started.len(), 2);
        assert!(started[1] - started[0] >= Duration::from_millis(80));
    }
}
