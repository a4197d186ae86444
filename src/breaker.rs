//! Circuit breaker guarding calls to the remote cache.
//!
//! Tri-state failure detector:
//!
//! ```text
//! Closed ──(failures >= threshold)──▶ Open
//! Open ──(reset timeout elapsed)──▶ HalfOpen
//! HalfOpen ──(half_open_max successes)──▶ Closed
//! HalfOpen ──(any failure)──▶ Open
//! ```
//!
//! Every read-or-transition is a single critical section, so concurrent
//! callers observe a consistent state machine.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of the breaker, for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    /// Consecutive failures observed while Closed.
    pub failures: u32,
    /// Successful probes so far (meaningful only in HalfOpen).
    pub successes: u32,
    pub last_failure: Option<Instant>,
    pub last_transition: Option<Instant>,
}

struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
    last_transition: Option<Instant>,
}

pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    reset_timeout: Duration,
    half_open_max: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset_timeout: Duration, half_open_max: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
                last_transition: None,
            }),
            threshold,
            reset_timeout,
            half_open_max,
        }
    }

    /// Whether a call may proceed right now.
    ///
    /// In Open state this is also the recovery probe: once the reset timeout
    /// has elapsed since the last failure, the first caller flips the breaker
    /// to HalfOpen and is allowed through.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed() > self.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.successes = 0;
                    inner.last_transition = Some(Instant::now());
                    true
                } else {
                    false
                }
            }
            // A limited budget of live probes while on probation.
            CircuitState::HalfOpen => inner.successes < self.half_open_max,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.half_open_max {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.last_transition = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call. Returns `true` only when this call transitioned
    /// the breaker to Open, so callers can warn exactly once per trip.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();

        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.threshold {
                    inner.state = CircuitState::Open;
                    inner.last_transition = Some(Instant::now());
                    return true;
                }
                false
            }
            // A single failure during probation re-opens the circuit.
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.last_transition = Some(Instant::now());
                true
            }
            CircuitState::Open => false,
        }
    }

    /// Force the breaker back to Closed, clearing counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.successes = 0;
        inner.last_transition = Some(Instant::now());
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap().state == CircuitState::Open
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap();
        BreakerSnapshot {
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            last_failure: inner.last_failure,
            last_transition: inner.last_transition,
        }
    }
}
