//! Error Handler
//!
//! Classifies raw errors, keeps a bounded error history and per-code failure patterns, and
//! drives recovery strategies (retry with backoff, circuit breaker, rollback, compensation,
//! manual). Circuit and retry state are keyed by error code and shared by every caller.
//!
//! No lock is held across an await point: every mutation is a short critical section.

pub mod backoff;
pub mod circuit;
pub mod classify;
pub mod metrics;
pub mod predict;

use crate::history::RingLog;
use crate::telemetry::{EventBus, RecoveryEvent};
use crate::types::Severity;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub use backoff::{BackoffStrategy, RetryConfig};
pub use circuit::{Admission, CircuitBreakerState, CircuitConfig, CircuitRegistry, CircuitState};
pub use classify::{infer_code, infer_severity, ErrorCode, ErrorContext, RawError, SystemError};
pub use metrics::{RetryMetrics, RetryMetricsRegistry};
pub use predict::{FailurePatterns, FailurePrediction};

/// Async recovery action. Must be callable repeatedly.
pub type RecoveryAction = Arc<dyn Fn() -> BoxFuture<'static, Result<(), RawError>> + Send + Sync>;

/// Wrap an async closure as a [`RecoveryAction`].
pub fn action<F, Fut>(f: F) -> RecoveryAction
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RawError>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, Result<(), RawError>> { Box::pin(f()) })
}

/// Callbacks from the retry loop. Every method has a no-op default.
pub trait RecoveryObserver: Send + Sync {
    /// Called before each backoff sleep.
    fn on_retry_attempt(&self, _attempt: u32, _delay: Duration) {}
    /// Called once when the loop exits successfully.
    fn on_recovery_success(&self) {}
    /// Called once when the loop gives up.
    fn on_recovery_failure(&self, _error: &RawError) {}
}

pub struct NoopObserver;

impl RecoveryObserver for NoopObserver {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Retry,
    CircuitBreaker,
    Rollback,
    Compensate,
    /// Logged only
    Manual,
}

#[derive(Clone)]
pub struct RecoveryStrategy {
    pub kind: StrategyKind,
    action: Option<RecoveryAction>,
    retry: Option<RetryConfig>,
}

impl RecoveryStrategy {
    /// Retry `action` with the given backoff, or the code's default profile when `None`.
    pub fn retry(action: RecoveryAction, config: Option<RetryConfig>) -> Self {
        Self {
            kind: StrategyKind::Retry,
            action: Some(action),
            retry: config,
        }
    }

    pub fn circuit_breaker(action: RecoveryAction) -> Self {
        Self {
            kind: StrategyKind::CircuitBreaker,
            action: Some(action),
            retry: None,
        }
    }

    pub fn rollback(action: RecoveryAction) -> Self {
        Self {
            kind: StrategyKind::Rollback,
            action: Some(action),
            retry: None,
        }
    }

    pub fn compensate(action: RecoveryAction) -> Self {
        Self {
            kind: StrategyKind::Compensate,
            action: Some(action),
            retry: None,
        }
    }

    pub fn manual() -> Self {
        Self {
            kind: StrategyKind::Manual,
            action: None,
            retry: None,
        }
    }
}

/// What `handle_error` did about an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// The registered strategy's action succeeded
    Recovered,
    /// The registered strategy ran and gave up
    Failed,
    /// The code's circuit is open; nothing was attempted
    CircuitOpen,
    /// Manual strategy: surfaced, not acted on
    ManualInterventionRequired,
    /// Boundary violations and unknown errors
    NotRecoverable,
    /// Retryable with no registered action; the caller re-admits the failed work
    Deferred,
    /// Recoverable, not retryable, and no strategy registered
    NoStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandledError {
    pub error: SystemError,
    pub outcome: RecoveryOutcome,
}

/// Result of a call through the circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitOutcome {
    Succeeded,
    Failed(RawError),
    /// The circuit was open; the action was not invoked
    Rejected,
}

fn default_history_size() -> usize {
    1000
}

fn default_pattern_window() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Occurrences per code kept for prediction
    #[serde(default = "default_pattern_window")]
    pub pattern_window: usize,

    #[serde(default)]
    pub circuit: CircuitConfig,

    /// Replaces the built-in backoff profile for a code
    #[serde(default)]
    pub retry_overrides: BTreeMap<ErrorCode, RetryConfig>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
            pattern_window: default_pattern_window(),
            circuit: CircuitConfig::default(),
            retry_overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
    pub total: usize,
    pub by_code: BTreeMap<ErrorCode, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub recoverable: usize,
    pub retryable: usize,
}

pub struct ErrorHandler {
    config: RecoveryConfig,
    history: Mutex<RingLog<SystemError>>,
    patterns: FailurePatterns,
    circuits: CircuitRegistry,
    metrics: RetryMetricsRegistry,
    strategies: RwLock<HashMap<ErrorCode, RecoveryStrategy>>,
    events: Option<EventBus>,
}

impl ErrorHandler {
    pub fn new(config: RecoveryConfig) -> Self {
        let mut strategies = HashMap::new();
        strategies.insert(ErrorCode::ValidationError, RecoveryStrategy::manual());
        Self {
            history: Mutex::new(RingLog::new(config.history_size)),
            patterns: FailurePatterns::new(config.pattern_window),
            circuits: CircuitRegistry::new(config.circuit),
            metrics: RetryMetricsRegistry::new(),
            strategies: RwLock::new(strategies),
            events: None,
            config,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: RecoveryEvent) {
        if let Some(events) = &self.events {
            events.emit(None, event);
        }
    }

    fn emit_transition(&self, transition: Option<circuit::Transition>) {
        if let Some(t) = transition {
            self.emit(RecoveryEvent::CircuitTransition {
                code: t.code,
                from: t.from,
                to: t.to,
            });
        }
    }

    pub fn register_strategy(&self, code: ErrorCode, strategy: RecoveryStrategy) {
        debug!(code = %code, kind = ?strategy.kind, "Recovery strategy registered");
        self.strategies.write().insert(code, strategy);
    }

    /// Backoff for a code: configured override, else the built-in profile.
    pub fn retry_config_for(&self, code: ErrorCode) -> Option<RetryConfig> {
        self.config
            .retry_overrides
            .get(&code)
            .cloned()
            .or_else(|| RetryConfig::profile_for(code))
    }

    /// Classify, record, and attempt recovery.
    pub async fn handle_error(&self, raw: RawError, context: ErrorContext) -> HandledError {
        let error = SystemError::classify(&raw, context);
        let code = error.code;
        self.patterns.record(code, error.timestamp);
        self.history.lock().push(error.clone());

        match error.severity {
            Severity::Critical | Severity::High => error!(
                error_id = %error.id,
                code = %code,
                severity = %error.severity,
                "System error: {}",
                error.message
            ),
            _ => warn!(
                error_id = %error.id,
                code = %code,
                severity = %error.severity,
                "System error: {}",
                error.message
            ),
        }

        if !error.recoverable {
            return HandledError {
                error,
                outcome: RecoveryOutcome::NotRecoverable,
            };
        }
        if self.circuits.is_open(code) {
            info!(code = %code, "Recovery skipped, circuit open");
            return HandledError {
                error,
                outcome: RecoveryOutcome::CircuitOpen,
            };
        }

        let strategy = self.strategies.read().get(&code).cloned();
        let outcome = match strategy {
            Some(strategy) => self.run_strategy(code, strategy, &raw).await,
            None if error.retryable => {
                let transition = self.circuits.record_failure(code);
                self.emit_transition(transition);
                RecoveryOutcome::Deferred
            }
            None => RecoveryOutcome::NoStrategy,
        };
        debug!(error_id = %error.id, outcome = ?outcome, "Error handled");
        HandledError { error, outcome }
    }

    async fn run_strategy(
        &self,
        code: ErrorCode,
        strategy: RecoveryStrategy,
        raw: &RawError,
    ) -> RecoveryOutcome {
        let Some(action) = strategy.action.clone() else {
            warn!(code = %code, "Manual intervention required: {}", raw.message);
            return RecoveryOutcome::ManualInterventionRequired;
        };
        match strategy.kind {
            StrategyKind::Manual => RecoveryOutcome::ManualInterventionRequired,
            StrategyKind::Retry => {
                let Some(config) = strategy.retry.or_else(|| self.retry_config_for(code)) else {
                    return RecoveryOutcome::NoStrategy;
                };
                if self
                    .retry_with_backoff(code, action, &config, &NoopObserver)
                    .await
                {
                    RecoveryOutcome::Recovered
                } else {
                    RecoveryOutcome::Failed
                }
            }
            StrategyKind::CircuitBreaker => {
                match self.execute_with_circuit_breaker(code, action).await {
                    CircuitOutcome::Succeeded => RecoveryOutcome::Recovered,
                    CircuitOutcome::Failed(_) => RecoveryOutcome::Failed,
                    CircuitOutcome::Rejected => RecoveryOutcome::CircuitOpen,
                }
            }
            StrategyKind::Rollback | StrategyKind::Compensate => match action().await {
                Ok(()) => {
                    info!(code = %code, kind = ?strategy.kind, "Recovery action succeeded");
                    RecoveryOutcome::Recovered
                }
                Err(err) => {
                    warn!(code = %code, kind = ?strategy.kind, error = %err, "Recovery action failed");
                    RecoveryOutcome::Failed
                }
            },
        }
    }

    /// Run `action` up to `max_attempts` times with backoff between attempts.
    ///
    /// Returns false immediately, without invoking the action, while the code's circuit is open.
    /// Each attempt feeds the code's circuit and retry metrics.
    pub async fn retry_with_backoff(
        &self,
        code: ErrorCode,
        action: RecoveryAction,
        config: &RetryConfig,
        observer: &dyn RecoveryObserver,
    ) -> bool {
        let max_attempts = config.max_attempts.max(1);
        let mut last_error = RawError::new(format!("circuit open for {}", code));

        for attempt in 1..=max_attempts {
            match self.circuits.try_acquire(code) {
                Admission::Rejected => {
                    info!(code = %code, attempt, "Retry refused, circuit open");
                    break;
                }
                Admission::Allowed(transition) => self.emit_transition(transition),
            }

            let started = Instant::now();
            let result = action().await;
            self.metrics.record_attempt(code, started.elapsed());

            match result {
                Ok(()) => {
                    let transition = self.circuits.record_success(code);
                    self.emit_transition(transition);
                    self.metrics.record_episode(code, true);
                    info!(code = %code, attempts = attempt, "Recovery succeeded");
                    self.emit(RecoveryEvent::RecoverySucceeded {
                        code,
                        attempts: attempt,
                    });
                    observer.on_recovery_success();
                    return true;
                }
                Err(err) => {
                    let transition = self.circuits.record_failure(code);
                    self.emit_transition(transition);
                    debug!(code = %code, attempt, error = %err, "Recovery attempt failed");
                    last_error = err;
                }
            }

            if attempt < max_attempts {
                let delay = config.calculate_delay(attempt);
                observer.on_retry_attempt(attempt, delay);
                self.emit(RecoveryEvent::RetryAttempt {
                    code,
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
                tokio::time::sleep(delay).await;
            }
        }

        self.metrics.record_episode(code, false);
        warn!(code = %code, error = %last_error, "Recovery failed");
        self.emit(RecoveryEvent::RecoveryFailed {
            code,
            attempts: max_attempts,
            error: last_error.message.clone(),
        });
        observer.on_recovery_failure(&last_error);
        false
    }

    /// Run `action` once through the code's breaker.
    pub async fn execute_with_circuit_breaker(
        &self,
        code: ErrorCode,
        action: RecoveryAction,
    ) -> CircuitOutcome {
        match self.circuits.try_acquire(code) {
            Admission::Rejected => return CircuitOutcome::Rejected,
            Admission::Allowed(transition) => self.emit_transition(transition),
        }
        match action().await {
            Ok(()) => {
                let transition = self.circuits.record_success(code);
                self.emit_transition(transition);
                CircuitOutcome::Succeeded
            }
            Err(err) => {
                let transition = self.circuits.record_failure(code);
                self.emit_transition(transition);
                CircuitOutcome::Failed(err)
            }
        }
    }

    /// Report that work deferred to the caller eventually succeeded.
    pub fn record_recovery(&self, code: ErrorCode) {
        if let Admission::Allowed(transition) = self.circuits.try_acquire(code) {
            self.emit_transition(transition);
        }
        let transition = self.circuits.record_success(code);
        self.emit_transition(transition);
    }

    pub fn is_circuit_open(&self, code: ErrorCode) -> bool {
        self.circuits.is_open(code)
    }

    pub fn circuit_state(&self, code: ErrorCode) -> CircuitBreakerState {
        self.circuits.state(code)
    }

    pub fn circuits(&self) -> Vec<(ErrorCode, CircuitBreakerState)> {
        self.circuits.snapshot()
    }

    pub fn retry_metrics(&self, code: ErrorCode) -> RetryMetrics {
        self.metrics.get(code)
    }

    pub fn all_retry_metrics(&self) -> BTreeMap<ErrorCode, RetryMetrics> {
        self.metrics.all()
    }

    pub fn predict_failure(&self, code: ErrorCode) -> Option<FailurePrediction> {
        self.patterns.predict(code)
    }

    /// Up to `limit` most recent errors, newest first.
    pub fn error_history(&self, limit: usize) -> Vec<SystemError> {
        self.history
            .lock()
            .recent(limit)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn error_stats(&self) -> ErrorStats {
        let history = self.history.lock();
        let mut stats = ErrorStats::default();
        for error in history.iter() {
            stats.total += 1;
            *stats.by_code.entry(error.code).or_insert(0) += 1;
            *stats.by_severity.entry(error.severity).or_insert(0) += 1;
            stats.recoverable += usize::from(error.recoverable);
            stats.retryable += usize::from(error.retryable);
        }
        stats
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}
