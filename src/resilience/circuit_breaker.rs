//! Circuit breaker guarding calls to the odds source.
//!
//! Trips open after `max_failures` consecutive failures and rejects calls with
//! `CircuitOpen` until `timeout` has passed since the last failure. The next call
//! after that is a single half-open trial: success closes the circuit, failure
//! re-opens it and restarts the timer. Outcomes of calls admitted before the
//! circuit opened only count while it is still closed.
//!
//! The bookkeeping lives in [`BreakerState`], whose transitions are plain
//! functions of (state, event) so they can be tested without a runtime.

use crate::config::CircuitBreakerConfig;
use crate::error::AccessError;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum BreakerEvent {
    /// `trial` is set when the call was admitted as the half-open trial.
    Success { trial: bool },
    Failure { at: Instant, trial: bool },
    /// A half-open trial was dropped before it finished.
    TrialAbandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    Reject { retry_in: Duration },
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerState {
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure: Option<Instant>,
    pub trial_in_flight: bool,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            circuit: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            trial_in_flight: false,
        }
    }
}

impl BreakerState {
    /// Decide whether a call starting at `now` may run.
    pub fn admit(self, now: Instant, timeout: Duration) -> (Self, Admission) {
        match self.circuit {
            CircuitState::Closed => (self, Admission::Proceed),
            CircuitState::Open => {
                let opened_at = self.last_failure.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= timeout {
                    let next = Self {
                        circuit: CircuitState::HalfOpen,
                        trial_in_flight: true,
                        ..self
                    };
                    (next, Admission::Proceed)
                } else {
                    (self, Admission::Reject { retry_in: timeout - elapsed })
                }
            }
            CircuitState::HalfOpen if self.trial_in_flight => {
                (self, Admission::Reject { retry_in: Duration::ZERO })
            }
            CircuitState::HalfOpen => (
                Self {
                    trial_in_flight: true,
                    ..self
                },
                Admission::Proceed,
            ),
        }
    }

    /// Apply the outcome of an admitted call.
    pub fn on_event(self, event: BreakerEvent, max_failures: u32) -> Self {
        match (self.circuit, event) {
            (CircuitState::HalfOpen, BreakerEvent::TrialAbandoned) => Self {
                trial_in_flight: false,
                ..self
            },
            (_, BreakerEvent::TrialAbandoned) => self,
            (CircuitState::Closed, BreakerEvent::Success { .. })
            | (CircuitState::HalfOpen, BreakerEvent::Success { trial: true }) => Self {
                circuit: CircuitState::Closed,
                consecutive_failures: 0,
                trial_in_flight: false,
                ..self
            },
            (CircuitState::HalfOpen, BreakerEvent::Failure { at, trial: true }) => Self {
                circuit: CircuitState::Open,
                consecutive_failures: self.consecutive_failures.saturating_add(1),
                last_failure: Some(at),
                trial_in_flight: false,
            },
            (CircuitState::Closed, BreakerEvent::Failure { at, .. }) => {
                let failures = self.consecutive_failures.saturating_add(1);
                let circuit = if failures >= max_failures {
                    CircuitState::Open
                } else {
                    CircuitState::Closed
                };
                Self {
                    circuit,
                    consecutive_failures: failures,
                    last_failure: Some(at),
                    trial_in_flight: false,
                }
            }
            // Stragglers admitted while closed that finish after the circuit opened
            (CircuitState::Open | CircuitState::HalfOpen, _) => self,
        }
    }
}

/// Point-in-time view for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_trips: u64,
    pub total_successes: u64,
    pub total_failures: u64,
}

#[derive(Debug, Default)]
struct Inner {
    state: BreakerState,
    total_trips: u64,
    total_successes: u64,
    total_failures: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    max_failures: u32,
    timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// `max_failures` of 0 is treated as 1.
    pub fn new(max_failures: u32, timeout: Duration) -> Self {
        Self {
            max_failures: max_failures.max(1),
            timeout,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.max_failures, config.timeout())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state.circuit
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state.circuit,
            consecutive_failures: inner.state.consecutive_failures,
            total_trips: inner.total_trips,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// While open the operation is not invoked at all.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, AccessError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AccessError>>,
    {
        let is_trial = {
            let mut inner = self.lock();
            let (next, admission) = inner.state.admit(Instant::now(), self.timeout);
            if next.circuit == CircuitState::HalfOpen && inner.state.circuit == CircuitState::Open {
                tracing::info!("circuit half-open, admitting trial call");
            }
            inner.state = next;
            if let Admission::Reject { retry_in } = admission {
                return Err(AccessError::CircuitOpen { retry_in });
            }
            next.circuit == CircuitState::HalfOpen
        };

        let mut guard = TrialGuard {
            breaker: self,
            armed: is_trial,
        };
        let result = operation().await;
        guard.armed = false;

        let event = match &result {
            Ok(_) => BreakerEvent::Success { trial: is_trial },
            Err(_) => BreakerEvent::Failure {
                at: Instant::now(),
                trial: is_trial,
            },
        };
        self.record(event);
        result
    }

    fn record(&self, event: BreakerEvent) {
        let mut inner = self.lock();
        let before = inner.state.circuit;
        inner.state = inner.state.on_event(event, self.max_failures);
        let after = inner.state.circuit;

        match event {
            BreakerEvent::Success { .. } => inner.total_successes += 1,
            BreakerEvent::Failure { .. } => inner.total_failures += 1,
            BreakerEvent::TrialAbandoned => {}
        }

        if before != CircuitState::Open && after == CircuitState::Open {
            inner.total_trips += 1;
            tracing::warn!(
                failures = inner.state.consecutive_failures,
                timeout_ms = self.timeout.as_millis() as u64,
                "circuit opened"
            );
        } else if before != CircuitState::Closed && after == CircuitState::Closed {
            tracing::info!("circuit closed");
        }
    }
}

/// Releases the half-open trial slot if the trial future is dropped mid-call.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.record(BreakerEvent::TrialAbandoned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const TIMEOUT: Duration = Duration::from_millis(60);

    fn fail() -> Result<u32, AccessError> {
        Err(AccessError::fetch_failed("LAL@GSW", "boom"))
    }

    #[test]
    fn test_closed_counts_failures_then_opens() {
        let now = Instant::now();
        let mut state = BreakerState::default();
        for _ in 0..2 {
            state = state.on_event(BreakerEvent::Failure { at: now, trial: false }, 3);
            assert_eq!(state.circuit, CircuitState::Closed);
        }
        state = state.on_event(BreakerEvent::Failure { at: now, trial: false }, 3);
        assert_eq!(state.circuit, CircuitState::Open);
        assert_eq!(state.consecutive_failures, 3);
    }

    #[test]
    fn test_success_resets_counter_while_closed() {
        let now = Instant::now();
        let state = BreakerState::default()
            .on_event(BreakerEvent::Failure { at: now, trial: false }, 3)
            .on_event(BreakerEvent::Failure { at: now, trial: false }, 3)
            .on_event(BreakerEvent::Success { trial: false }, 3);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.circuit, CircuitState::Closed);
    }

    #[test]
    fn test_open_rejects_until_timeout_then_admits_one_trial() {
        let t0 = Instant::now();
        let open = BreakerState {
            circuit: CircuitState::Open,
            consecutive_failures: 3,
            last_failure: Some(t0),
            trial_in_flight: false,
        };

        let (same, admission) = open.admit(t0 + Duration::from_millis(10), TIMEOUT);
        assert_eq!(same.circuit, CircuitState::Open);
        assert_eq!(admission, Admission::Reject { retry_in: Duration::from_millis(50) });

        let (trial, admission) = open.admit(t0 + TIMEOUT, TIMEOUT);
        assert_eq!(trial.circuit, CircuitState::HalfOpen);
        assert_eq!(admission, Admission::Proceed);

        let (_, second) = trial.admit(t0 + TIMEOUT, TIMEOUT);
        assert!(matches!(second, Admission::Reject { .. }));
    }

    #[test]
    fn test_half_open_failure_reopens_with_fresh_timer() {
        let t0 = Instant::now();
        let trial = BreakerState {
            circuit: CircuitState::HalfOpen,
            consecutive_failures: 3,
            last_failure: Some(t0),
            trial_in_flight: true,
        };
        let t1 = t0 + Duration::from_millis(100);
        let reopened = trial.on_event(BreakerEvent::Failure { at: t1, trial: true }, 3);
        assert_eq!(reopened.circuit, CircuitState::Open);
        assert_eq!(reopened.last_failure, Some(t1));
        assert!(!reopened.trial_in_flight);
    }

    #[test]
    fn test_late_outcomes_do_not_move_open_or_half_open_circuit() {
        let t0 = Instant::now();
        let open = BreakerState {
            circuit: CircuitState::Open,
            consecutive_failures: 1,
            last_failure: Some(t0),
            trial_in_flight: false,
        };
        let after_success = open.on_event(BreakerEvent::Success { trial: false }, 1);
        assert_eq!(after_success.circuit, CircuitState::Open);
        assert_eq!(after_success.consecutive_failures, 1);
        let after_failure = open.on_event(
            BreakerEvent::Failure { at: t0 + TIMEOUT, trial: false },
            1,
        );
        assert_eq!(after_failure.last_failure, Some(t0), "timer not extended");

        let half_open = BreakerState {
            circuit: CircuitState::HalfOpen,
            trial_in_flight: true,
            ..open
        };
        let still_trialing = half_open.on_event(BreakerEvent::Success { trial: false }, 1);
        assert_eq!(still_trialing.circuit, CircuitState::HalfOpen);
        assert!(still_trialing.trial_in_flight);
    }

    #[test]
    fn test_abandoned_trial_frees_slot() {
        let trial = BreakerState {
            circuit: CircuitState::HalfOpen,
            consecutive_failures: 3,
            last_failure: None,
            trial_in_flight: true,
        };
        let freed = trial.on_event(BreakerEvent::TrialAbandoned, 3);
        assert_eq!(freed.circuit, CircuitState::HalfOpen);
        assert!(!freed.trial_in_flight);
    }

    #[tokio::test]
    async fn test_open_breaker_does_not_invoke_operation() {
        let breaker = CircuitBreaker::new(3, TIMEOUT);
        for _ in 0..3 {
            assert!(breaker.call(|| async { fail() }).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;
        assert!(matches!(result, Err(AccessError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_success_closes_and_resets() {
        let breaker = CircuitBreaker::new(3, TIMEOUT);
        for _ in 0..3 {
            let _ = breaker.call(|| async { fail() }).await;
        }
        tokio::time::sleep(TIMEOUT + Duration::from_millis(10)).await;

        assert_eq!(breaker.call(|| async { Ok(7) }).await.unwrap(), 7);
        let snap = breaker.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.total_trips, 1);
        assert_eq!(snap.total_failures, 3);
        assert_eq!(snap.total_successes, 1);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(3, TIMEOUT);
        for _ in 0..3 {
            let _ = breaker.call(|| async { fail() }).await;
        }
        tokio::time::sleep(TIMEOUT + Duration::from_millis(10)).await;

        let err = breaker.call(|| async { fail() }).await.unwrap_err();
        assert!(matches!(err, AccessError::FetchFailed { .. }));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().total_trips, 2);

        // Timer restarted by the failed trial
        let again = breaker.call(|| async { Ok(1) }).await;
        assert!(matches!(again, Err(AccessError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_slow_success_does_not_close_tripped_breaker() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        let slow_ok = breaker.call(|| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(1)
        });
        let fast_fail = breaker.call(|| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            fail()
        });
        let (ok, err) = tokio::join!(slow_ok, fast_fail);

        assert_eq!(ok.unwrap(), 1);
        assert!(err.is_err());
        let snap = breaker.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.consecutive_failures, 1);
        assert_eq!(snap.total_successes, 1);
    }

    #[tokio::test]
    async fn test_dropped_trial_does_not_wedge_breaker() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        let _ = breaker.call(|| async { fail() }).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let stalled = breaker.call(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(0)
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(20), stalled).await;
        assert!(timed_out.is_err());

        assert_eq!(breaker.call(|| async { Ok(5) }).await.unwrap(), 5);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
