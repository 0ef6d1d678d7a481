//! Error handler: retry with backoff, circuit breaking, deferred recovery

use conductor::recovery::{
    action, CircuitConfig, CircuitOutcome, CircuitState, ErrorCode, ErrorContext, ErrorHandler,
    RawError, RecoveryConfig, RecoveryObserver, RecoveryOutcome, RecoveryStrategy, RetryConfig,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingObserver {
    delays: Mutex<Vec<(u32, Duration)>>,
    failures: Mutex<Vec<String>>,
    successes: AtomicU32,
}

impl RecoveryObserver for RecordingObserver {
    fn on_retry_attempt(&self, attempt: u32, delay: Duration) {
        self.delays.lock().push((attempt, delay));
    }

    fn on_recovery_success(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_recovery_failure(&self, error: &RawError) {
        self.failures.lock().push(error.message.clone());
    }
}

fn counting_action(fail_times: u32) -> (Arc<AtomicU32>, conductor::recovery::RecoveryAction) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let act = action(move || {
        let counter = counter.clone();
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= fail_times {
                Err(RawError::new(format!("network unreachable (attempt {})", n)))
            } else {
                Ok(())
            }
        }
    });
    (calls, act)
}

#[tokio::test]
async fn test_retry_gives_up_after_max_attempts() {
    let handler = ErrorHandler::new(RecoveryConfig::default());
    let observer = RecordingObserver::default();
    let (calls, act) = counting_action(u32::MAX);
    let config = RetryConfig::exponential(3, 100, 1_000);

    let recovered = handler
        .retry_with_backoff(ErrorCode::TimeoutError, act, &config, &observer)
        .await;

    assert!(!recovered);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let delays = observer.delays.lock().clone();
    assert_eq!(
        delays,
        vec![
            (1, Duration::from_millis(100)),
            (2, Duration::from_millis(200))
        ]
    );
    assert_eq!(observer.failures.lock().len(), 1);
    assert_eq!(observer.successes.load(Ordering::SeqCst), 0);

    let metrics = handler.retry_metrics(ErrorCode::TimeoutError);
    assert_eq!(metrics.total_retries, 3);
    assert_eq!(metrics.failed_retries, 1);
    assert_eq!(metrics.successful_retries, 0);
}

#[tokio::test]
async fn test_retry_stops_at_first_success() {
    let handler = ErrorHandler::new(RecoveryConfig::default());
    let observer = RecordingObserver::default();
    let (calls, act) = counting_action(1);
    let config = RetryConfig::exponential(5, 1, 10);

    assert!(
        handler
            .retry_with_backoff(ErrorCode::NetworkError, act, &config, &observer)
            .await
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(observer.successes.load(Ordering::SeqCst), 1);
    assert_eq!(handler.retry_metrics(ErrorCode::NetworkError).successful_retries, 1);
}

#[tokio::test]
async fn test_circuit_opens_and_rejects_without_invoking() {
    let config = RecoveryConfig {
        circuit: CircuitConfig {
            failure_threshold: 2,
            reset_time_ms: 60_000,
            half_open_requests: 1,
        },
        ..RecoveryConfig::default()
    };
    let handler = ErrorHandler::new(config);
    let (calls, act) = counting_action(u32::MAX);

    for _ in 0..2 {
        let outcome = handler
            .execute_with_circuit_breaker(ErrorCode::NetworkError, act.clone())
            .await;
        assert!(matches!(outcome, CircuitOutcome::Failed(_)));
    }
    assert!(handler.is_circuit_open(ErrorCode::NetworkError));
    assert_eq!(
        handler.circuit_state(ErrorCode::NetworkError).state,
        CircuitState::Open
    );

    let outcome = handler
        .execute_with_circuit_breaker(ErrorCode::NetworkError, act.clone())
        .await;
    assert_eq!(outcome, CircuitOutcome::Rejected);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let retried = handler
        .retry_with_backoff(
            ErrorCode::NetworkError,
            act,
            &RetryConfig::exponential(3, 1, 10),
            &conductor::recovery::NoopObserver,
        )
        .await;
    assert!(!retried);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Other codes keep their own breaker.
    assert!(!handler.is_circuit_open(ErrorCode::TimeoutError));
}

#[tokio::test]
async fn test_handle_error_outcomes_by_code() {
    let handler = ErrorHandler::new(RecoveryConfig::default());

    let violation = handler
        .handle_error(
            RawError::new("Boundary violation: planning content contains code block"),
            ErrorContext::new().actor("planning", "planner-1"),
        )
        .await;
    assert_eq!(violation.error.code, ErrorCode::BoundaryViolation);
    assert_eq!(violation.outcome, RecoveryOutcome::NotRecoverable);

    let timeout = handler
        .handle_error(RawError::new("Request timeout after 30s"), ErrorContext::new())
        .await;
    assert_eq!(timeout.error.code, ErrorCode::TimeoutError);
    assert_eq!(timeout.outcome, RecoveryOutcome::Deferred);

    let invalid = handler
        .handle_error(
            RawError::new("payload rejected").with_code("VALIDATION_ERROR"),
            ErrorContext::new(),
        )
        .await;
    assert_eq!(invalid.outcome, RecoveryOutcome::ManualInterventionRequired);

    let stats = handler.error_stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_code.get(&ErrorCode::TimeoutError), Some(&1));
    assert_eq!(handler.error_history(2).len(), 2);
}

#[tokio::test]
async fn test_registered_retry_strategy_recovers() {
    let handler = ErrorHandler::new(RecoveryConfig::default());
    let (calls, act) = counting_action(2);
    handler.register_strategy(
        ErrorCode::NetworkError,
        RecoveryStrategy::retry(act, Some(RetryConfig::exponential(4, 1, 5))),
    );

    let handled = handler
        .handle_error(RawError::new("network connection reset"), ErrorContext::new())
        .await;
    assert_eq!(handled.outcome, RecoveryOutcome::Recovered);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_prediction_needs_three_occurrences() {
    let handler = ErrorHandler::new(RecoveryConfig::default());
    for _ in 0..2 {
        handler
            .handle_error(RawError::new("rate limit exceeded"), ErrorContext::new())
            .await;
    }
    assert!(handler.predict_failure(ErrorCode::RateLimitError).is_none());

    handler
        .handle_error(RawError::new("rate limit exceeded"), ErrorContext::new())
        .await;
    let prediction = handler.predict_failure(ErrorCode::RateLimitError).unwrap();
    assert_eq!(prediction.samples, 3);
    assert!((0.0..=1.0).contains(&prediction.likelihood));
}
