//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed failing, requests are refused
//! - Half-Open: cooldown elapsed, traffic admitted on trial
//!
//! # State Transitions
//! ```text
//! Closed → Open:      consecutive failures >= threshold
//! Open → Half-Open:   allow_request() after cooldown since last failure
//! Half-Open → Open:   another failure (counter still at threshold)
//! any → Closed:       a single success
//! ```
//!
//! # Design Decisions
//! - Per-backend circuit breaker (not global)
//! - Own lock, separate from the backend's load signals
//! - Independent from the health prober's alive flag

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::CircuitBreakerConfig;

/// Circuit breaker state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    /// Small integer used for the circuit state gauge.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Per-backend circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerState>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            }),
            failure_threshold,
            cooldown,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.cooldown())
    }

    // Every transition leaves the state consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Record a failed request. Returns true if this failure opened the circuit.
    pub fn record_failure(&self) -> bool {
        self.record_failure_at(Instant::now())
    }

    pub fn record_failure_at(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(now);

        if inner.state != CircuitState::Open && inner.consecutive_failures >= self.failure_threshold {
            inner.state = CircuitState::Open;
            return true;
        }
        false
    }

    /// Record a successful request. Returns true if the circuit was not already closed.
    pub fn record_success(&self) -> bool {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        let previous = std::mem::replace(&mut inner.state, CircuitState::Closed);
        previous != CircuitState::Closed
    }

    /// Whether a request may be sent. Moves an open circuit to half-open once
    /// the cooldown since the last failure has passed.
    pub fn allow_request(&self) -> bool {
        self.allow_request_at(Instant::now())
    }

    pub fn allow_request_at(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = inner
                    .last_failure
                    .map_or(true, |at| now.saturating_duration_since(at) > self.cooldown);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    tracing::debug!("Circuit breaker open -> half_open");
                }
                cooled
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::from_config(&CircuitBreakerConfig::default())
    }
}
