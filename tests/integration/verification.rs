//! Session verification: contracts, scoring, gates

use crate::integration::test_utils::{delivered_service, engine, passing_runner, service_instruction};
use conductor::error::{GateError, OrchestratorError};
use conductor::protocol::{
    DeliverableKind, DeliverableStatus, ExecutionResult, ExecutionStatus, InstructionProtocol,
    Session,
};
use conductor::telemetry::{drain, ConductorEvent, EventBus, GateEvent};
use conductor::verification::{
    StaticChangeSource, StaticEvidenceRunner, VerificationConfig, VerificationEngine,
    VerificationGates,
};
use std::sync::Arc;
use tempfile::TempDir;

fn user_service_instruction(session_id: &str) -> InstructionProtocol {
    InstructionProtocol::new(session_id)
        .with_objective("User lookup")
        .with_requirement("Expose user lookup by email")
        .with_deliverable(
            DeliverableKind::File,
            Some("src/services/UserService.ts"),
            "user service",
        )
        .with_deliverable(DeliverableKind::Documentation, Some("docs/users.md"), "user docs")
}

#[tokio::test]
async fn test_fully_delivered_session_verifies_and_deploys() {
    let temp = TempDir::new().unwrap();
    let engine = Arc::new(engine(temp.path(), passing_runner()));
    let session = Session::new("s-ok");
    engine
        .create_session_contract(&session, &[service_instruction("s-ok")])
        .unwrap();

    let result = engine.verify_session("s-ok", &delivered_service()).await;
    assert!(result.verified);
    assert_eq!(result.verification_score, 100);
    assert!(result.missing_deliverables.is_empty());
    assert!(result
        .evidence_found
        .iter()
        .any(|e| e == "Build succeeds"));

    let gates = VerificationGates::new(engine.clone());
    gates.pre_deployment_gate("s-ok").unwrap();
    assert_eq!(gates.quality_gate("s-ok", None).unwrap(), 100);
}

#[tokio::test]
async fn test_documentation_does_not_satisfy_code_deliverable() {
    let temp = TempDir::new().unwrap();
    let engine = engine(temp.path(), passing_runner());
    let session = Session::new("s-docs");
    let contract = engine
        .create_session_contract(&session, &[user_service_instruction("s-docs")])
        .unwrap();
    let code = &contract.planned_deliverables[0];
    assert!(code.required);
    assert!(!contract.planned_deliverables[1].required);

    let delivered = ExecutionResult::new(ExecutionStatus::Success)
        .with_deliverable("./src/services/UserService.ts", DeliverableStatus::Modified);
    assert!(engine.verify_deliverable(code, &delivered));

    let docs_only = ExecutionResult::new(ExecutionStatus::Success)
        .with_deliverable("docs/users.md", DeliverableStatus::Created);
    assert!(!engine.verify_deliverable(code, &docs_only));

    let result = engine.verify_session("s-docs", &docs_only).await;
    assert!(!result.verified);
    assert_eq!(result.missing_deliverables, vec!["user service".to_string()]);
    assert_eq!(result.verification_score, 60);
}

#[tokio::test]
async fn test_unverified_session_is_blocked_from_deployment() {
    let temp = TempDir::new().unwrap();
    let events = EventBus::new();
    let rx = events.subscribe();
    let engine = Arc::new(engine(temp.path(), passing_runner()));
    let gates = VerificationGates::new(engine.clone()).with_events(events);

    let err = gates.pre_deployment_gate("s-never").unwrap_err();
    assert!(err.to_string().starts_with("DEPLOYMENT BLOCKED"));

    engine
        .create_session_contract(&Session::new("s-bad"), &[user_service_instruction("s-bad")])
        .unwrap();
    engine
        .verify_session("s-bad", &ExecutionResult::new(ExecutionStatus::Success))
        .await;
    let err = gates.pre_deployment_gate("s-bad").unwrap_err();
    assert!(matches!(err, GateError::DeploymentBlocked { .. }));
    assert!(err.to_string().contains("DEPLOYMENT BLOCKED"));

    let blocked = drain(&rx)
        .into_iter()
        .filter(|e| matches!(e.event, ConductorEvent::Gate(GateEvent::Blocked { .. })))
        .count();
    assert_eq!(blocked, 2);
}

#[tokio::test]
async fn test_failing_checks_lower_the_score() {
    let temp = TempDir::new().unwrap();
    let runner = StaticEvidenceRunner::new()
        .with_exit("cargo build", 0)
        .with_exit("cargo check", 0)
        .with_exit("cargo test", 101);
    let engine = Arc::new(engine(temp.path(), runner));
    engine
        .create_session_contract(&Session::new("s-tests"), &[service_instruction("s-tests")])
        .unwrap();

    let result = engine.verify_session("s-tests", &delivered_service()).await;
    assert_eq!(result.verification_score, 70);
    assert!(!result.verified);
    assert_eq!(result.failed_criteria.len(), 1);
    assert!(result.failed_criteria[0].starts_with("Tests pass"));

    let gates = VerificationGates::new(engine.clone());
    let err = gates.quality_gate("s-tests", Some(80)).unwrap_err();
    assert_eq!(
        err,
        GateError::QualityBlocked {
            session_id: "s-tests".to_string(),
            score: 70,
            min_score: 80,
        }
    );
    assert_eq!(gates.quality_gate("s-tests", Some(60)).unwrap(), 70);
}

#[tokio::test]
async fn test_unplanned_changes_are_reported() {
    let temp = TempDir::new().unwrap();
    let engine = VerificationEngine::new(temp.path(), VerificationConfig::default())
        .with_runner(Arc::new(passing_runner()))
        .with_change_source(Arc::new(StaticChangeSource::new([
            "src/service.rs",
            "src/unrelated.rs",
        ])));
    engine
        .create_session_contract(&Session::new("s-extra"), &[service_instruction("s-extra")])
        .unwrap();

    let result = engine.verify_session("s-extra", &delivered_service()).await;
    assert_eq!(result.unexpected_changes, vec!["src/unrelated.rs".to_string()]);
}

#[tokio::test]
async fn test_contract_survives_engine_restart() {
    let temp = TempDir::new().unwrap();
    {
        let engine = engine(temp.path(), passing_runner());
        engine
            .create_session_contract(&Session::new("s-disk"), &[service_instruction("s-disk")])
            .unwrap();
    }

    let engine = engine(temp.path(), passing_runner());
    let contract = engine.contract("s-disk").unwrap().unwrap();
    assert_eq!(contract.session_id, "s-disk");
    assert!(matches!(
        engine.create_session_contract(&Session::new("s-disk"), &[]),
        Err(OrchestratorError::ContractExists(_))
    ));
}

#[tokio::test]
async fn test_rollback_required_when_deployment_stops_verifying() {
    let temp = TempDir::new().unwrap();
    let engine = Arc::new(engine(temp.path(), passing_runner()));
    let gates = VerificationGates::new(engine.clone());

    assert!(gates.rollback_gate("s-unknown", "deploy-1").await);

    engine
        .create_session_contract(&Session::new("s-roll"), &[service_instruction("s-roll")])
        .unwrap();
    engine.verify_session("s-roll", &delivered_service()).await;
    assert!(!gates.rollback_gate("s-roll", "deploy-2").await);

    let report = gates
        .continuous_verification_gate(&["s-roll".to_string(), "s-unknown".to_string()])
        .await;
    assert_eq!(report.get("s-roll"), Some(&true));
    assert_eq!(report.get("s-unknown"), Some(&false));
}

#[tokio::test]
async fn test_report_carries_parseable_score() {
    let temp = TempDir::new().unwrap();
    let engine = engine(temp.path(), passing_runner());
    engine
        .create_session_contract(&Session::new("s-report"), &[service_instruction("s-report")])
        .unwrap();
    engine.verify_session("s-report", &delivered_service()).await;

    let report = engine.generate_report("s-report");
    assert!(report.contains("Verification Score: 100/100"));
    assert_eq!(conductor::verification::report::parse_score(&report), Some(100));
}
