//! Circuit breaker for backend resilience
//!
//! Tracks failures per named operation and stops calling a dependency that
//! keeps failing, then probes it again after a recovery timeout. Circuits
//! are created lazily on first reference, live for the process lifetime, and
//! are only ever reset explicitly.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::{CircuitConfig, ClosedSuccessPolicy};

/// Circuit state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed,
    /// Failing fast, calls are rejected.
    Open,
    /// Probing recovery with a bounded number of trial calls.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
    half_open_calls: u32,
}

impl Circuit {
    fn new() -> Self {
        Circuit {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            last_failure: None,
            half_open_calls: 0,
        }
    }
}

/// Read-only snapshot of one circuit, for inspection surfaces
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    /// Milliseconds since the last recorded failure, if any.
    #[serde(rename = "lastFailureAgeMs")]
    pub last_failure_age_ms: Option<u64>,
}

/// Registry of named circuits.
///
/// The breaker never errors: "not permitted" is a first-class boolean
/// outcome, distinct from a network failure.
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, Circuit>>,
    config: CircuitConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Whether a call under `name` is currently permitted.
    ///
    /// An Open circuit whose recovery timeout has elapsed transitions to
    /// HalfOpen as a side effect and permits the call as the first probe.
    pub fn can_execute(&self, name: &str) -> bool {
        self.can_execute_at(name, Instant::now())
    }

    fn can_execute_at(&self, name: &str, now: Instant) -> bool {
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(name.to_string()).or_insert_with(Circuit::new);

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = circuit
                    .last_failure
                    .map(|t| now.saturating_duration_since(t))
                    .unwrap_or_default();
                if elapsed > self.config.open_timeout {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.half_open_calls = 1;
                    circuit.successes = 0;
                    tracing::info!(circuit = name, "circuit OPEN -> HALF_OPEN");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if circuit.half_open_calls < self.config.half_open_max_calls {
                    circuit.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call under `name`.
    pub fn record_success(&self, name: &str) {
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(name.to_string()).or_insert_with(Circuit::new);

        match circuit.state {
            CircuitState::HalfOpen => {
                circuit.successes += 1;
                if circuit.successes >= self.config.success_threshold {
                    circuit.state = CircuitState::Closed;
                    circuit.failures = 0;
                    circuit.successes = 0;
                    tracing::info!(circuit = name, "circuit HALF_OPEN -> CLOSED");
                }
            }
            CircuitState::Closed => match self.config.on_closed_success {
                ClosedSuccessPolicy::Decay => {
                    circuit.failures = circuit.failures.saturating_sub(1);
                }
                ClosedSuccessPolicy::Reset => {
                    circuit.failures = 0;
                }
            },
            CircuitState::Open => {}
        }
    }

    /// Record a failed call under `name`.
    pub fn record_failure(&self, name: &str) {
        self.record_failure_at(name, Instant::now());
    }

    fn record_failure_at(&self, name: &str, now: Instant) {
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(name.to_string()).or_insert_with(Circuit::new);

        circuit.failures += 1;
        circuit.last_failure = Some(now);

        match circuit.state {
            CircuitState::HalfOpen => {
                circuit.state = CircuitState::Open;
                circuit.successes = 0;
                tracing::warn!(circuit = name, "circuit HALF_OPEN -> OPEN");
            }
            CircuitState::Closed if circuit.failures >= self.config.failure_threshold => {
                circuit.state = CircuitState::Open;
                tracing::warn!(
                    circuit = name,
                    failures = circuit.failures,
                    "circuit CLOSED -> OPEN"
                );
            }
            _ => {}
        }
    }

    /// Current state of `name`, creating the circuit if it does not exist.
    pub fn state(&self, name: &str) -> CircuitState {
        let mut circuits = self.circuits.lock();
        circuits
            .entry(name.to_string())
            .or_insert_with(Circuit::new)
            .state
    }

    /// Drop one circuit, returning it to a fresh Closed state on next use.
    pub fn reset(&self, name: &str) {
        self.circuits.lock().remove(name);
    }

    /// Drop every circuit.
    pub fn reset_all(&self) {
        self.circuits.lock().clear();
    }

    /// Snapshot every known circuit for inspection.
    pub fn all_states(&self) -> HashMap<String, CircuitSnapshot> {
        let now = Instant::now();
        self.circuits
            .lock()
            .iter()
            .map(|(name, circuit)| {
                (
                    name.clone(),
                    CircuitSnapshot {
                        state: circuit.state,
                        failures: circuit.failures,
                        successes: circuit.successes,
                        last_failure_age_ms: circuit
                            .last_failure
                            .map(|t| now.saturating_duration_since(t).as_millis() as u64),
                    },
                )
            })
            .collect()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}
