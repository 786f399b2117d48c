//! Circuit Breaker Implementation
//!
//! Implements the circuit breaker pattern to stop sending traffic to a
//! consistently failing service. The circuit breaker has three states:
//! - Closed: Normal operation, requests pass through
//! - Open: Too many failures, requests are rejected immediately
//! - HalfOpen: Testing recovery, requests allowed while successes are counted
//!
//! State transitions:
//! - Closed → Open: When consecutive failures reach the failure threshold
//! - Open → HalfOpen: On the first query once the timeout has elapsed since the last failure
//! - HalfOpen → Closed: When consecutive successes reach the success threshold
//! - HalfOpen → Open: On any failure during testing
//!
//! Every transition resets both counters.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Failing - requests rejected immediately
    Open,
    /// Testing recovery
    HalfOpen,
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Number of consecutive successes to close circuit from half-open
    pub success_threshold: u32,
    /// Duration to wait after the last failure before going half-open
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
}

/// Point-in-time view of a breaker, for health and metrics output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

/// Circuit breaker for a single service
///
/// All reads and transitions happen under one mutex, held only for the
/// in-memory update. The breaker never performs I/O.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure: None,
            }),
        }
    }

    /// Create a new circuit breaker with default configuration
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get the current circuit state
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Whether a request may be attempted right now
    ///
    /// In the open state this moves the breaker to half-open (and returns
    /// true) once `timeout` has elapsed since the last recorded failure.
    pub fn can_attempt(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let expired = inner
                    .last_failure
                    .is_none_or(|at| at.elapsed() >= self.config.timeout);
                if expired {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                }
                expired
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            // Not attempted while open
            CircuitState::Open => {}
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.last_failure = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.last_failure = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {
                inner.last_failure = Some(Instant::now());
            }
        }
    }

    /// Force the circuit to open (manual intervention)
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());
        self.transition(&mut inner, CircuitState::Open);
    }

    /// Force the circuit to close (manual intervention)
    pub fn force_close(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed);
    }

    /// Get the number of consecutive failures
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Get the number of consecutive successes (relevant in half-open state)
    pub fn consecutive_successes(&self) -> u32 {
        self.lock().consecutive_successes
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;

        if from == to {
            return;
        }
        match to {
            CircuitState::Open => {
                tracing::warn!(service = %self.name, ?from, "Circuit breaker opened")
            }
            CircuitState::HalfOpen => tracing::info!(
                service = %self.name,
                "Circuit breaker half-open (testing recovery)"
            ),
            CircuitState::Closed => {
                tracing::info!(service = %self.name, "Circuit breaker closed (recovered)")
            }
        }
    }
}

/// Wrapper that can be shared across threads
pub type SharedCircuitBreaker = Arc<CircuitBreaker>;
