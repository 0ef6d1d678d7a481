//! End-to-end flow: plan, queue, execute, verify, deploy

use crate::integration::test_utils::{
    delivered_service, engine, passing_runner, service_instruction, ScriptedExecutor,
    ScriptedPlanner,
};
use async_trait::async_trait;
use conductor::boundary::Actor;
use conductor::config::ConductorConfig;
use conductor::error::{GateError, OrchestratorError};
use conductor::protocol::{ExecutionResult, InstructionProtocol, Session, SessionStatus};
use conductor::queue::InstructionStatus;
use conductor::recovery::{ErrorCode, RetryConfig};
use conductor::telemetry::{drain, ConductorEvent, GateEvent, RecoveryEvent};
use conductor::{FlowOutcome, Orchestrator, PlanningAgent};
use std::sync::Arc;
use tempfile::TempDir;

fn fast_retry_config() -> ConductorConfig {
    let mut config = ConductorConfig::default();
    config
        .recovery
        .retry_overrides
        .insert(ErrorCode::TimeoutError, RetryConfig::exponential(3, 1, 5));
    config
}

fn orchestrator(
    temp: &TempDir,
    executor: Arc<ScriptedExecutor>,
) -> Orchestrator {
    Orchestrator::from_parts(
        &fast_retry_config(),
        engine(temp.path(), passing_runner()),
        Arc::new(ScriptedPlanner::new()),
        executor,
    )
    .unwrap()
}

#[tokio::test]
async fn test_planned_session_completes_and_deploys() {
    let temp = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::new(delivered_service()));
    let orchestrator = orchestrator(&temp, executor.clone());
    let rx = orchestrator.events().subscribe();

    let (session, ids) = orchestrator
        .plan_and_submit("Add a cache in front of the user store")
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
    assert!(orchestrator.engine().contract(&session.id).unwrap().is_some());

    let outcomes = orchestrator.run_until_idle().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        FlowOutcome::Completed {
            session_id,
            verification: Some(verification),
            ..
        } => {
            assert_eq!(session_id, &session.id);
            assert!(verification.verified);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(
        orchestrator.session(&session.id).unwrap().status,
        SessionStatus::Completed
    );

    let deployment = orchestrator.deploy(&session.id).unwrap();
    assert!(deployment.starts_with("deploy"));
    assert_eq!(
        orchestrator.session(&session.id).unwrap().status,
        SessionStatus::Deployed
    );
    assert!(!orchestrator.rollback_required(&session.id, &deployment).await);
    assert_eq!(executor.calls(), 1);

    let events = drain(&rx);
    assert!(events.iter().any(|e| matches!(
        e.event,
        ConductorEvent::Gate(GateEvent::Passed { .. })
    )));
    assert_eq!(orchestrator.monitor().violation_stats().total, 0);
}

#[tokio::test]
async fn test_transient_failure_is_retried_then_completes() {
    let temp = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::new(delivered_service()).then_fail("upstream timeout"));
    let orchestrator = orchestrator(&temp, executor.clone());
    let rx = orchestrator.events().subscribe();

    let session = Session::new("s-retry");
    let ids = orchestrator
        .submit(&session, vec![service_instruction("s-retry")], Some(7))
        .unwrap();

    match orchestrator.run_next().await.unwrap() {
        FlowOutcome::Retrying {
            instruction_id,
            code,
            retry_count,
        } => {
            assert_eq!(instruction_id, ids[0]);
            assert_eq!(code, ErrorCode::TimeoutError);
            assert_eq!(retry_count, 1);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(
        orchestrator.queue().get(&ids[0]).unwrap().status,
        InstructionStatus::Pending
    );

    match orchestrator.run_next().await.unwrap() {
        FlowOutcome::Completed { verification, .. } => {
            assert!(verification.is_some_and(|v| v.verified));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(matches!(orchestrator.run_next().await.unwrap(), FlowOutcome::Idle));
    assert_eq!(executor.calls(), 2);
    assert!(!orchestrator.errors().is_circuit_open(ErrorCode::TimeoutError));
    assert_eq!(orchestrator.errors().error_stats().total, 1);

    let queued = orchestrator.queue().get(&ids[0]).unwrap();
    assert_eq!(queued.status, InstructionStatus::Completed);
    assert_eq!(queued.retry_count, 1);
    assert!(!drain(&rx).iter().any(|e| matches!(
        e.event,
        ConductorEvent::Recovery(RecoveryEvent::RecoveryFailed { .. })
    )));
}

#[tokio::test]
async fn test_non_retryable_failure_fails_the_session() {
    let temp = TempDir::new().unwrap();
    let executor =
        Arc::new(ScriptedExecutor::new(delivered_service()).then_fail("invalid manifest"));
    let orchestrator = orchestrator(&temp, executor.clone());

    let session = Session::new("s-invalid");
    orchestrator
        .submit(&session, vec![service_instruction("s-invalid")], None)
        .unwrap();

    match orchestrator.run_next().await.unwrap() {
        FlowOutcome::Failed { code, error, .. } => {
            assert_eq!(code, ErrorCode::ValidationError);
            assert!(error.contains("invalid manifest"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(matches!(orchestrator.run_next().await.unwrap(), FlowOutcome::Idle));
    assert_eq!(
        orchestrator.session("s-invalid").unwrap().status,
        SessionStatus::Failed
    );
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn test_undelivered_session_is_blocked_in_strict_mode() {
    let temp = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::new(ExecutionResult::success()));
    let orchestrator = orchestrator(&temp, executor);

    let session = Session::new("s-empty");
    orchestrator
        .submit(&session, vec![service_instruction("s-empty")], None)
        .unwrap();

    match orchestrator.run_next().await.unwrap() {
        FlowOutcome::Blocked { error, .. } => {
            assert!(matches!(error, GateError::CompletionBlocked { .. }));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(
        orchestrator.session("s-empty").unwrap().status,
        SessionStatus::Failed
    );

    let err = orchestrator.deploy("s-empty").unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Gate(GateError::DeploymentBlocked { .. })
    ));
}

#[tokio::test]
async fn test_cancelled_session_runs_nothing() {
    let temp = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::new(delivered_service()));
    let orchestrator = orchestrator(&temp, executor.clone());

    let session = Session::new("s-cancel");
    orchestrator
        .submit(
            &session,
            vec![service_instruction("s-cancel"), service_instruction("s-cancel")],
            None,
        )
        .unwrap();

    let cancelled = orchestrator.cancel_session("s-cancel").unwrap();
    assert_eq!(cancelled.len(), 2);
    assert_eq!(
        orchestrator.session("s-cancel").unwrap().status,
        SessionStatus::Cancelled
    );
    assert!(matches!(orchestrator.run_next().await.unwrap(), FlowOutcome::Idle));
    assert_eq!(executor.calls(), 0);
}

struct CodeWritingPlanner {
    actor: Actor,
}

#[async_trait]
impl PlanningAgent for CodeWritingPlanner {
    fn actor(&self) -> &Actor {
        &self.actor
    }

    async fn plan(
        &self,
        session: &Session,
        _request: &str,
    ) -> Result<Vec<InstructionProtocol>, OrchestratorError> {
        Ok(vec![InstructionProtocol::new(&session.id)
            .with_requirement("Add this: fn cache_get(key: &str) { lookup(key); }")])
    }
}

#[tokio::test]
async fn test_planner_emitting_code_is_refused() {
    let temp = TempDir::new().unwrap();
    let orchestrator = Orchestrator::from_parts(
        &ConductorConfig::default(),
        engine(temp.path(), passing_runner()),
        Arc::new(CodeWritingPlanner {
            actor: Actor::planning("planner-2"),
        }),
        Arc::new(ScriptedExecutor::new(delivered_service())),
    )
    .unwrap();

    let err = orchestrator
        .plan_and_submit("Add a cache")
        .await
        .unwrap_err();
    assert!(err.is_boundary_violation());
    assert!(orchestrator.queue().is_empty());
    assert_eq!(orchestrator.monitor().violation_stats().total, 1);
}

#[test]
fn test_swapped_actors_are_rejected() {
    let temp = TempDir::new().unwrap();
    let planner = Arc::new(CodeWritingPlanner {
        actor: Actor::execution("not-a-planner"),
    });
    let result = Orchestrator::from_parts(
        &ConductorConfig::default(),
        engine(temp.path(), passing_runner()),
        planner,
        Arc::new(ScriptedExecutor::new(delivered_service())),
    );
    assert!(matches!(result, Err(OrchestratorError::ConfigError(_))));
}

fn orchestrator_with(
    temp: &TempDir,
    config: &ConductorConfig,
    executor: Arc<ScriptedExecutor>,
) -> Orchestrator {
    Orchestrator::from_parts(
        config,
        engine(temp.path(), passing_runner()),
        Arc::new(ScriptedPlanner::new()),
        executor,
    )
    .unwrap()
}

#[tokio::test]
async fn test_submit_that_overflows_the_queue_leaves_nothing_behind() {
    let temp = TempDir::new().unwrap();
    let mut config = fast_retry_config();
    config.queue.max_size = 1;
    let executor = Arc::new(ScriptedExecutor::new(delivered_service()));
    let orchestrator = orchestrator_with(&temp, &config, executor);

    let session = Session::new("s-overflow");
    let err = orchestrator
        .submit(
            &session,
            vec![service_instruction("s-overflow"), service_instruction("s-overflow")],
            None,
        )
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::QueueFull { capacity: 1 }));
    assert!(orchestrator.queue().is_empty());
    assert!(orchestrator.engine().contract("s-overflow").unwrap().is_none());
    assert!(!orchestrator.engine().store().exists("s-overflow"));
    assert!(orchestrator.session("s-overflow").is_none());

    let ids = orchestrator
        .submit(&session, vec![service_instruction("s-overflow")], None)
        .unwrap();
    assert_eq!(ids.len(), 1);
    assert!(orchestrator.engine().contract("s-overflow").unwrap().is_some());
}

#[tokio::test]
async fn test_retries_stop_at_the_error_code_attempt_limit() {
    let temp = TempDir::new().unwrap();
    let mut config = fast_retry_config();
    config
        .recovery
        .retry_overrides
        .insert(ErrorCode::AuthError, RetryConfig::exponential(2, 1, 2));
    let executor = Arc::new(
        ScriptedExecutor::new(delivered_service())
            .then_fail("401 unauthorized")
            .then_fail("401 unauthorized")
            .then_fail("401 unauthorized")
            .then_fail("401 unauthorized"),
    );
    let orchestrator = orchestrator_with(&temp, &config, executor.clone());

    let session = Session::new("s-auth");
    let ids = orchestrator
        .submit(&session, vec![service_instruction("s-auth")], None)
        .unwrap();

    let outcomes = orchestrator.run_until_idle().await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(matches!(
        outcomes[0],
        FlowOutcome::Retrying { code: ErrorCode::AuthError, retry_count: 1, .. }
    ));
    assert!(matches!(
        outcomes[1],
        FlowOutcome::Failed { code: ErrorCode::AuthError, .. }
    ));
    assert_eq!(executor.calls(), 2);

    let record = orchestrator.queue().get(&ids[0]).unwrap();
    assert_eq!(record.status, InstructionStatus::Failed);
    assert_eq!(record.retry_count, 1);
    assert_eq!(
        orchestrator.session("s-auth").unwrap().status,
        SessionStatus::Failed
    );
}
