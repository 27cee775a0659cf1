//! Per-host circuit breaker (C2).
//!
//! Three-state failure gate per host. All state changes happen under the
//! breaker's own lock (here, a [`parking_lot::Mutex`] guarding a plain
//! struct) so callers never observe a torn state transition.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::CircuitBreakerOptions;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation; requests pass through.
    Closed,
    /// Failing fast; requests via this breaker are rejected.
    Open,
    /// Probing for recovery; a limited number of requests are allowed through.
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Instant,
}

/// A per-host circuit breaker.
///
/// See `spec.md` §4.3 for the full state machine this implements.
pub struct CircuitBreaker {
    failure_threshold: u32,
    open_duration: Duration,
    success_threshold_in_half_open: u32,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("state", &inner.state)
            .field("consecutive_failures", &inner.consecutive_failures)
            .field("consecutive_successes", &inner.consecutive_successes)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new breaker from the given options, starting Closed.
    #[must_use]
    pub fn new(options: &CircuitBreakerOptions) -> Self {
        Self {
            failure_threshold: options.failure_threshold,
            open_duration: options.open_duration,
            success_threshold_in_half_open: options.success_threshold_in_half_open,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: Instant::now(),
            }),
        }
    }

    /// Current state, after applying the Open -> HalfOpen timeout transition
    /// (§4.3: "when a caller invokes `checkState()` and `now - openedAt >
    /// openDuration`, transition to HalfOpen").
    pub fn check_state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    /// Whether a request should currently be allowed through this breaker.
    pub fn allows_request(&self) -> bool {
        !matches!(self.check_state(), CircuitState::Open)
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.success_threshold_in_half_open {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed operation.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Instant::now();
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Instant::now();
                inner.consecutive_successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker back to Closed, zeroing both counters. Used on an
    /// observed host up-transition (§4.2 step 3).
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
    }

    /// A point-in-time snapshot for metrics/observability.
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner);
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
        }
    }

    fn maybe_transition_to_half_open(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open && inner.opened_at.elapsed() > self.open_duration {
            inner.state = CircuitState::HalfOpen;
            inner.consecutive_successes = 0;
        }
    }
}

/// Snapshot of a breaker's state for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(failure_threshold: u32, open_duration: Duration, success_threshold: u32) -> CircuitBreakerOptions {
        CircuitBreakerOptions {
            failure_threshold,
            open_duration,
            success_threshold_in_half_open: success_threshold,
        }
    }

    #[test]
    fn starts_closed_and_allows_requests() {
        let breaker = CircuitBreaker::new(&CircuitBreakerOptions::default());
        assert_eq!(breaker.check_state(), CircuitState::Closed);
        assert!(breaker.allows_request());
    }

    #[test]
    fn trips_open_after_failure_threshold() {
        let breaker = CircuitBreaker::new(&opts(2, Duration::from_secs(30), 2));
        breaker.record_failure();
        assert_eq!(breaker.check_state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.check_state(), CircuitState::Open);
        assert!(!breaker.allows_request());
    }

    #[test]
    fn success_in_closed_resets_failure_count() {
        let breaker = CircuitBreaker::new(&opts(2, Duration::from_secs(30), 2));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.check_state(), CircuitState::Closed);
    }

    #[test]
    fn open_transitions_to_half_open_after_timeout() {
        let breaker = CircuitBreaker::new(&opts(1, Duration::from_millis(10), 2));
        breaker.record_failure();
        assert_eq!(breaker.check_state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(breaker.check_state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new(&opts(1, Duration::from_millis(5), 2));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(breaker.check_state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.check_state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.check_state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new(&opts(1, Duration::from_millis(5), 2));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(breaker.check_state(), CircuitState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.check_state(), CircuitState::Open);
    }

    #[test]
    fn reset_forces_closed() {
        let breaker = CircuitBreaker::new(&opts(1, Duration::from_secs(30), 2));
        breaker.record_failure();
        assert_eq!(breaker.check_state(), CircuitState::Open);
        breaker.reset();
        assert_eq!(breaker.check_state(), CircuitState::Closed);
        assert!(breaker.allows_request());
    }
}
