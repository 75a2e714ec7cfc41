//! Circuit breaker to stop calling an unhealthy provider.
//!
//! When upstream calls fail repeatedly, the circuit opens and lookups are
//! refused immediately, without spending tokens or attempting network I/O.
//!
//! Every admitted call holds a [`Permit`] stamped with the breaker's
//! generation. The generation moves on each state change, so an outcome
//! reported for a call admitted under an earlier state is ignored. In
//! HALF_OPEN this means only the trial decides what happens next.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time before attempting recovery
    #[serde(with = "crate::config::humantime_serde")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// State of the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed { failures: u32 },

    /// Circuit is open, all calls are refused
    Open { opened_at: Instant },

    /// One trial call is in flight
    HalfOpen { trial_started: Instant },
}

/// Serializable view of [`CircuitState`] for health reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn status(&self) -> CircuitStatus {
        match self {
            CircuitState::Closed { .. } => CircuitStatus::Closed,
            CircuitState::Open { .. } => CircuitStatus::Open,
            CircuitState::HalfOpen { .. } => CircuitStatus::HalfOpen,
        }
    }
}

/// Admission for one upstream call. Hand it back with the call's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "report the outcome with record_success or record_failure"]
pub struct Permit {
    generation: u64,
    trial: bool,
}

impl Permit {
    /// Whether this is the single HALF_OPEN trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

struct Inner {
    state: CircuitState,
    generation: u64,
}

impl Inner {
    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.generation += 1;
    }

    fn is_current(&self, permit: Permit) -> bool {
        permit.generation == self.generation
    }
}

/// Circuit breaker guarding the provider.
///
/// `permit` is checked before every upstream call; every granted permit must
/// be returned through exactly one `record_success` or `record_failure`.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed { failures: 0 },
                generation: 0,
            }),
            config,
        }
    }

    /// Ask to make an upstream call.
    ///
    /// Moves OPEN to HALF_OPEN once the recovery timeout has elapsed and
    /// grants that single trial. A trial whose outcome is never recorded
    /// (its caller was cancelled) is replaced after another recovery timeout.
    pub fn permit(&self) -> Option<Permit> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed { .. } => Some(Permit {
                generation: inner.generation,
                trial: false,
            }),
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() < self.config.recovery_timeout {
                    return None;
                }
                inner.transition(CircuitState::HalfOpen {
                    trial_started: Instant::now(),
                });
                tracing::info!("Circuit half-open, permitting one trial request");
                Some(Permit {
                    generation: inner.generation,
                    trial: true,
                })
            }
            CircuitState::HalfOpen { trial_started } => {
                if trial_started.elapsed() < self.config.recovery_timeout {
                    return None;
                }
                inner.transition(CircuitState::HalfOpen {
                    trial_started: Instant::now(),
                });
                tracing::warn!("Previous trial request never reported, permitting another");
                Some(Permit {
                    generation: inner.generation,
                    trial: true,
                })
            }
        }
    }

    /// True when `permit` would currently refuse. Does not change state.
    pub fn is_open(&self) -> bool {
        match self.inner.lock().state {
            CircuitState::Closed { .. } => false,
            CircuitState::Open { opened_at } => {
                opened_at.elapsed() < self.config.recovery_timeout
            }
            CircuitState::HalfOpen { trial_started } => {
                trial_started.elapsed() < self.config.recovery_timeout
            }
        }
    }

    /// Record a successful upstream call.
    pub fn record_success(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        if !inner.is_current(permit) {
            tracing::debug!(trial = permit.trial, "Ignoring success from an earlier circuit state");
            return;
        }

        match inner.state {
            CircuitState::HalfOpen { .. } => {
                inner.transition(CircuitState::Closed { failures: 0 });
                tracing::info!("Circuit closed after successful trial request");
            }
            CircuitState::Closed { failures } if failures > 0 => {
                inner.state = CircuitState::Closed { failures: 0 };
            }
            _ => {}
        }
    }

    /// Record a failed upstream call.
    pub fn record_failure(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        if !inner.is_current(permit) {
            tracing::debug!(trial = permit.trial, "Ignoring failure from an earlier circuit state");
            return;
        }

        match inner.state {
            CircuitState::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.config.failure_threshold {
                    inner.transition(CircuitState::Open {
                        opened_at: Instant::now(),
                    });
                    tracing::warn!(
                        failures,
                        recovery_timeout = ?self.config.recovery_timeout,
                        "Circuit opened after repeated failures"
                    );
                } else {
                    inner.state = CircuitState::Closed { failures };
                }
            }
            CircuitState::HalfOpen { .. } => {
                inner.transition(CircuitState::Open {
                    opened_at: Instant::now(),
                });
                tracing::warn!("Circuit reopened after failed trial request");
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Get current state of the circuit.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consecutive failures counted while closed.
    pub fn consecutive_failures(&self) -> u32 {
        match self.inner.lock().state {
            CircuitState::Closed { failures } => failures,
            _ => self.config.failure_threshold,
        }
    }

    /// Reset the circuit to closed. Outstanding permits become stale.
    pub fn reset(&self) {
        self.inner
            .lock()
            .transition(CircuitState::Closed { failures: 0 });
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
