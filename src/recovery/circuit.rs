//! Per-error-code circuit breakers.
//!
//! closed --(failure_threshold failures)--> open --(reset_time elapsed)--> half-open
//! half-open --(half_open_requests successes)--> closed; half-open --(any failure)--> open

use crate::recovery::classify::ErrorCode;
use crate::types::{millis_between, now, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_time_ms() -> u64 {
    60_000
}

fn default_half_open_requests() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_time_ms")]
    pub reset_time_ms: u64,
    #[serde(default = "default_half_open_requests")]
    pub half_open_requests: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_time_ms: default_reset_time_ms(),
            half_open_requests: default_half_open_requests(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half-open",
            CircuitState::Open => "open",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<Timestamp>,
    pub success_count: u32,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            success_count: 0,
        }
    }
}

/// A state change, reported so callers can emit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub code: ErrorCode,
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Outcome of asking a breaker for permission to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed(Option<Transition>),
    Rejected,
}

pub struct CircuitRegistry {
    config: CircuitConfig,
    circuits: Mutex<HashMap<ErrorCode, CircuitBreakerState>>,
}

impl CircuitRegistry {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    fn reset_elapsed(&self, circuit: &CircuitBreakerState) -> bool {
        circuit
            .last_failure_time
            .map(|last| millis_between(&last, &now()) >= self.config.reset_time_ms)
            .unwrap_or(true)
    }

    /// True while the breaker is open and its reset time has not yet elapsed.
    pub fn is_open(&self, code: ErrorCode) -> bool {
        let circuits = self.circuits.lock();
        circuits
            .get(&code)
            .is_some_and(|c| c.state == CircuitState::Open && !self.reset_elapsed(c))
    }

    /// Admit or refuse a call. An open breaker past its reset time moves to half-open.
    pub fn try_acquire(&self, code: ErrorCode) -> Admission {
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(code).or_default();
        if circuit.state != CircuitState::Open {
            return Admission::Allowed(None);
        }
        if !self.reset_elapsed(circuit) {
            return Admission::Rejected;
        }
        circuit.state = CircuitState::HalfOpen;
        circuit.success_count = 0;
        info!(code = %code, "Circuit half-open");
        Admission::Allowed(Some(Transition {
            code,
            from: CircuitState::Open,
            to: CircuitState::HalfOpen,
        }))
    }

    pub fn record_success(&self, code: ErrorCode) -> Option<Transition> {
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(code).or_default();
        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                circuit.success_count += 1;
                if circuit.success_count < self.config.half_open_requests {
                    return None;
                }
                circuit.state = CircuitState::Closed;
                circuit.failure_count = 0;
                circuit.success_count = 0;
                info!(code = %code, "Circuit closed");
                Some(Transition {
                    code,
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Closed,
                })
            }
            CircuitState::Open => None,
        }
    }

    pub fn record_failure(&self, code: ErrorCode) -> Option<Transition> {
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(code).or_default();
        circuit.last_failure_time = Some(now());
        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count += 1;
                if circuit.failure_count < self.config.failure_threshold {
                    return None;
                }
                circuit.state = CircuitState::Open;
                warn!(
                    code = %code,
                    failures = circuit.failure_count,
                    "Circuit opened"
                );
                Some(Transition {
                    code,
                    from: CircuitState::Closed,
                    to: CircuitState::Open,
                })
            }
            CircuitState::HalfOpen => {
                circuit.state = CircuitState::Open;
                circuit.success_count = 0;
                warn!(code = %code, "Circuit re-opened from half-open");
                Some(Transition {
                    code,
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Open,
                })
            }
            CircuitState::Open => None,
        }
    }

    pub fn state(&self, code: ErrorCode) -> CircuitBreakerState {
        self.circuits.lock().get(&code).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<(ErrorCode, CircuitBreakerState)> {
        let mut out: Vec<_> = self
            .circuits
            .lock()
            .iter()
            .map(|(code, state)| (*code, state.clone()))
            .collect();
        out.sort_by_key(|(code, _)| *code);
        out
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}
