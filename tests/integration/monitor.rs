//! Runtime monitor and boundary enforcement across actors

use conductor::boundary::{ActorType, BoundaryEnforcer, MonitorConfig, RuntimeMonitor, ViolationType};
use conductor::error::OrchestratorError;
use conductor::telemetry::{drain, ConductorEvent, EventBus, MonitorEvent};
use serde_json::json;
use std::sync::Arc;

fn monitor() -> (RuntimeMonitor, EventBus) {
    let events = EventBus::new();
    let monitor = RuntimeMonitor::new(MonitorConfig::default(), Arc::new(BoundaryEnforcer::default()))
        .with_events(events.clone());
    (monitor, events)
}

#[test]
fn test_planner_cannot_execute() {
    let (monitor, events) = monitor();
    let rx = events.subscribe();

    let err = monitor
        .start_operation("planner-1", ActorType::Planning, "deploy to staging", json!({}))
        .unwrap_err();
    assert!(err.is_boundary_violation());

    let stats = monitor.violation_stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.by_type.get(&ViolationType::Boundary), Some(&1));
    assert_eq!(stats.by_actor_type.get(&ActorType::Planning), Some(&1));
    assert!(drain(&rx).iter().any(|e| matches!(
        e.event,
        ConductorEvent::Monitor(MonitorEvent::OperationBlocked { .. })
    )));
}

#[test]
fn test_operation_lifecycle_is_tracked() {
    let (monitor, _events) = monitor();
    let op = monitor
        .start_operation("executor-1", ActorType::Execution, "implement endpoint", json!({"n": 1}))
        .unwrap();
    assert_eq!(monitor.monitoring_status().active_operations, 1);

    let activity = monitor.complete_operation(&op, true).unwrap();
    assert!(activity.duration_ms.is_some());
    assert_eq!(monitor.monitoring_status().active_operations, 0);
    assert!(matches!(
        monitor.complete_operation("op-missing", true),
        Err(OrchestratorError::OperationNotFound(_))
    ));
}

#[test]
fn test_content_rules_depend_on_actor() {
    let (monitor, _events) = monitor();
    let code = "fn main() { println!(\"hi\"); }";
    let strategy = "I suggest we split the module first";

    assert!(monitor
        .check_content("planner-1", ActorType::Planning, code)
        .is_err());
    assert!(monitor
        .check_content("executor-1", ActorType::Execution, code)
        .is_ok());
    assert!(monitor
        .check_content("executor-1", ActorType::Execution, strategy)
        .is_err());
    assert!(monitor
        .check_content("planner-1", ActorType::Planning, strategy)
        .is_ok());

    let stats = monitor.violation_stats();
    assert_eq!(stats.by_type.get(&ViolationType::Content), Some(&2));
}

#[test]
fn test_endpoint_allowlist_per_role() {
    let (monitor, _events) = monitor();
    assert!(monitor
        .monitor_api_call("planner-1", ActorType::Planning, "/api/plan/new", &json!({}))
        .is_ok());
    assert!(monitor
        .monitor_api_call("executor-1", ActorType::Execution, "/api/files/src/main.rs", &json!({}))
        .is_ok());

    let err = monitor
        .monitor_api_call("planner-1", ActorType::Planning, "/api/deploy", &json!({"env": "prod"}))
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::EndpointUnauthorized { .. }));
    assert!(monitor
        .monitor_api_call("executor-1", ActorType::Execution, "/api/filesystem", &json!({}))
        .is_err());
    assert_eq!(monitor.violation_stats().by_type.get(&ViolationType::Api), Some(&2));
}
