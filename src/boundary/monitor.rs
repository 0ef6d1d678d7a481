//! Runtime Monitor
//!
//! Wraps every actor activity: classifies free-text operations, delegates to the
//! [`BoundaryEnforcer`], tracks activity lifetimes and guards endpoint access per role.
//! Statistics are projections over the enforcer's ledger, never kept separately.

use crate::boundary::content::classify_operation;
use crate::boundary::enforcer::BoundaryEnforcer;
use crate::boundary::{
    Actor, ActorType, Operation, OperationType, ViolationAlert, ViolationDetails, ViolationType,
};
use crate::error::OrchestratorError;
use crate::history::BoundedHistory;
use crate::telemetry::{EventBus, MonitorEvent};
use crate::types::{millis_between, new_id, now, Severity, Timestamp};
use chrono::Duration as ChronoDuration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

fn default_max_activities() -> usize {
    1000
}

fn default_activity_ttl_secs() -> u64 {
    3600
}

fn default_recent_violations() -> usize {
    100
}

fn default_planning_endpoints() -> Vec<String> {
    ["/api/plan", "/api/analyze", "/api/instructions", "/api/sessions"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_execution_endpoints() -> Vec<String> {
    [
        "/api/execute",
        "/api/files",
        "/api/build",
        "/api/test",
        "/api/deploy",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Monitor limits and endpoint allowlists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Retained activity records before the oldest is evicted
    #[serde(default = "default_max_activities")]
    pub max_activities: usize,

    /// Terminal activities older than this are garbage-collected
    #[serde(default = "default_activity_ttl_secs")]
    pub activity_ttl_secs: u64,

    /// Size of the recent-violation window
    #[serde(default = "default_recent_violations")]
    pub recent_violations: usize,

    /// Endpoint prefixes the planning actor may call
    #[serde(default = "default_planning_endpoints")]
    pub planning_endpoints: Vec<String>,

    /// Endpoint prefixes the execution actor may call
    #[serde(default = "default_execution_endpoints")]
    pub execution_endpoints: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_activities: default_max_activities(),
            activity_ttl_secs: default_activity_ttl_secs(),
            recent_violations: default_recent_violations(),
            planning_endpoints: default_planning_endpoints(),
            execution_endpoints: default_execution_endpoints(),
        }
    }
}

impl MonitorConfig {
    pub fn endpoints_for(&self, actor_type: ActorType) -> &[String] {
        match actor_type {
            ActorType::Planning => &self.planning_endpoints,
            ActorType::Execution => &self.execution_endpoints,
        }
    }

    /// Prefix match on path segments: `/api/files` allows `/api/files/src/main.rs`
    /// but not `/api/filesystem`.
    pub fn endpoint_allowed(&self, actor_type: ActorType, endpoint: &str) -> bool {
        let path = endpoint.split(['?', '#']).next().unwrap_or(endpoint);
        self.endpoints_for(actor_type).iter().any(|allowed| {
            let allowed = allowed.trim_end_matches('/');
            path == allowed
                || path
                    .strip_prefix(allowed)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Active,
    Completed,
    Failed,
}

/// One monitored operation from start to completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub actor_id: String,
    pub actor_type: ActorType,
    pub operation: String,
    pub operation_type: OperationType,
    pub metadata: Value,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
    pub duration_ms: Option<u64>,
    pub status: ActivityStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationStats {
    pub total: usize,
    pub blocked: usize,
    pub by_type: BTreeMap<ViolationType, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_actor_type: BTreeMap<ActorType, usize>,
    pub recent: Vec<ViolationAlert>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringStatus {
    pub active_operations: usize,
    pub tracked_activities: usize,
    pub total_violations: usize,
    pub uptime_ms: u64,
    pub started_at: Timestamp,
}

pub struct RuntimeMonitor {
    enforcer: Arc<BoundaryEnforcer>,
    config: MonitorConfig,
    activities: Mutex<BoundedHistory<String, Activity>>,
    events: Option<EventBus>,
    started_at: Timestamp,
}

impl RuntimeMonitor {
    pub fn new(config: MonitorConfig, enforcer: Arc<BoundaryEnforcer>) -> Self {
        Self {
            activities: Mutex::new(BoundedHistory::new(config.max_activities)),
            enforcer,
            config,
            events: None,
            started_at: now(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn enforcer(&self) -> &Arc<BoundaryEnforcer> {
        &self.enforcer
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn emit(&self, event: MonitorEvent) {
        if let Some(events) = &self.events {
            events.emit(None, event);
        }
    }

    fn record(&self, alert: ViolationAlert) {
        self.emit(MonitorEvent::Violation {
            alert: alert.clone(),
        });
        self.enforcer.record_violation(alert);
    }

    /// Start tracking an operation; fails synchronously if the actor's role forbids it.
    pub fn start_operation(
        &self,
        actor_id: &str,
        actor_type: ActorType,
        operation: &str,
        metadata: Value,
    ) -> Result<String, OrchestratorError> {
        let operation_type = classify_operation(operation);
        let op = Operation::new(operation_type, Actor::new(actor_id, actor_type), operation);

        if let Err(err) = self.enforcer.validate_operation(&op) {
            let reason = err.to_string();
            self.record(BoundaryEnforcer::operation_violation(
                &op,
                Severity::High,
                &reason,
            ));
            self.emit(MonitorEvent::OperationBlocked {
                actor_id: actor_id.to_string(),
                actor_type,
                operation: operation.to_string(),
                reason,
            });
            return Err(err);
        }

        let id = new_id("op");
        let activity = Activity {
            id: id.clone(),
            actor_id: actor_id.to_string(),
            actor_type,
            operation: operation.to_string(),
            operation_type,
            metadata,
            started_at: now(),
            ended_at: None,
            duration_ms: None,
            status: ActivityStatus::Active,
        };

        {
            let mut activities = self.activities.lock();
            self.collect_expired(&mut activities);
            if let Some((evicted, _)) = activities.insert(id.clone(), activity) {
                debug!(activity_id = %evicted, "Activity evicted at capacity");
            }
        }

        debug!(
            operation_id = %id,
            actor_id,
            actor_type = %actor_type,
            operation_type = %operation_type,
            "Operation started"
        );
        self.emit(MonitorEvent::OperationStarted {
            operation_id: id.clone(),
            actor_id: actor_id.to_string(),
            actor_type,
            operation_type,
        });
        Ok(id)
    }

    /// Mark an activity terminal and record its duration.
    pub fn complete_operation(
        &self,
        operation_id: &str,
        success: bool,
    ) -> Result<Activity, OrchestratorError> {
        let completed = {
            let mut activities = self.activities.lock();
            let activity = activities
                .get_mut(&operation_id.to_string())
                .ok_or_else(|| OrchestratorError::OperationNotFound(operation_id.to_string()))?;
            let ended = now();
            activity.duration_ms = Some(millis_between(&activity.started_at, &ended));
            activity.ended_at = Some(ended);
            activity.status = if success {
                ActivityStatus::Completed
            } else {
                ActivityStatus::Failed
            };
            activity.clone()
        };

        let duration_ms = completed.duration_ms.unwrap_or(0);
        debug!(operation_id, success, duration_ms, "Operation completed");
        self.emit(MonitorEvent::OperationCompleted {
            operation_id: operation_id.to_string(),
            success,
            duration_ms,
        });
        Ok(completed)
    }

    /// Check actor-authored text; a refusal is recorded as a content violation.
    pub fn check_content(
        &self,
        actor_id: &str,
        actor_type: ActorType,
        text: &str,
    ) -> Result<(), OrchestratorError> {
        match self.enforcer.validate_content(text, actor_type) {
            Ok(_) => Ok(()),
            Err(err) => {
                let classification = crate::boundary::classify_content(text);
                self.record(BoundaryEnforcer::content_violation(
                    actor_id,
                    actor_type,
                    text,
                    &classification,
                    Severity::High,
                ));
                Err(err)
            }
        }
    }

    /// Enforce the per-role endpoint allowlist.
    pub fn monitor_api_call(
        &self,
        actor_id: &str,
        actor_type: ActorType,
        endpoint: &str,
        payload: &Value,
    ) -> Result<(), OrchestratorError> {
        if self.config.endpoint_allowed(actor_type, endpoint) {
            debug!(actor_id, actor_type = %actor_type, endpoint, "API call permitted");
            return Ok(());
        }

        self.record(ViolationAlert::new(
            actor_id,
            actor_type,
            ViolationType::Api,
            Severity::Critical,
            format!("{} actor called unauthorized endpoint {}", actor_type, endpoint),
            ViolationDetails::Api {
                endpoint: endpoint.to_string(),
                payload: payload.clone(),
            },
        ));
        self.emit(MonitorEvent::ApiCallBlocked {
            actor_id: actor_id.to_string(),
            actor_type,
            endpoint: endpoint.to_string(),
        });
        Err(OrchestratorError::EndpointUnauthorized {
            actor_id: actor_id.to_string(),
            actor_type,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn activity(&self, operation_id: &str) -> Option<Activity> {
        self.activities.lock().get(&operation_id.to_string()).cloned()
    }

    pub fn active_operations(&self) -> Vec<Activity> {
        self.activities
            .lock()
            .values()
            .filter(|a| a.status == ActivityStatus::Active)
            .cloned()
            .collect()
    }

    /// Drop terminal activities older than the configured TTL; returns how many were removed.
    pub fn collect_garbage(&self) -> usize {
        let mut activities = self.activities.lock();
        self.collect_expired(&mut activities)
    }

    fn collect_expired(&self, activities: &mut BoundedHistory<String, Activity>) -> usize {
        let cutoff = now() - ChronoDuration::seconds(self.config.activity_ttl_secs as i64);
        let removed = activities.retain(|_, activity| match activity.ended_at {
            Some(ended) => activity.status == ActivityStatus::Active || ended > cutoff,
            None => true,
        });
        if !removed.is_empty() {
            info!(removed = removed.len(), "Expired activities collected");
        }
        removed.len()
    }

    pub fn violation_stats(&self) -> ViolationStats {
        let history = self.enforcer.violation_history();
        let mut by_type = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        let mut by_actor_type = BTreeMap::new();
        for alert in &history {
            *by_type.entry(alert.violation_type).or_insert(0) += 1;
            *by_severity.entry(alert.severity).or_insert(0) += 1;
            *by_actor_type.entry(alert.actor_type).or_insert(0) += 1;
        }
        ViolationStats {
            total: history.len(),
            blocked: history.iter().filter(|a| a.blocked).count(),
            by_type,
            by_severity,
            by_actor_type,
            recent: self.enforcer.recent_violations(10),
        }
    }

    pub fn monitoring_status(&self) -> MonitoringStatus {
        let (active, tracked) = {
            let activities = self.activities.lock();
            let active = activities
                .values()
                .filter(|a| a.status == ActivityStatus::Active)
                .count();
            (active, activities.len())
        };
        if active > 0 {
            debug!(active, "Monitoring status requested with operations in flight");
        }
        MonitoringStatus {
            active_operations: active,
            tracked_activities: tracked,
            total_violations: self.enforcer.violation_count(),
            uptime_ms: millis_between(&self.started_at, &now()),
            started_at: self.started_at,
        }
    }
}

impl Drop for RuntimeMonitor {
    fn drop(&mut self) {
        let active = self
            .activities
            .lock()
            .values()
            .filter(|a| a.status == ActivityStatus::Active)
            .count();
        if active > 0 {
            warn!(active, "Runtime monitor dropped with active operations");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{drain, ConductorEvent};
    use serde_json::json;

    fn monitor() -> RuntimeMonitor {
        RuntimeMonitor::new(
            MonitorConfig::default(),
            Arc::new(BoundaryEnforcer::default()),
        )
    }

    #[test]
    fn planning_actor_starting_deploy_is_blocked_and_recorded() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let monitor = monitor().with_events(bus);

        let err = monitor
            .start_operation("p1", ActorType::Planning, "deploy the service", json!({}))
            .unwrap_err();
        assert!(err.is_boundary_violation());

        let stats = monitor.violation_stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.by_severity.get(&Severity::High), Some(&1));

        let events = drain(&rx);
        assert!(matches!(
            events[0].event,
            ConductorEvent::Monitor(MonitorEvent::Violation { .. })
        ));
        assert!(matches!(
            events[1].event,
            ConductorEvent::Monitor(MonitorEvent::OperationBlocked { .. })
        ));
    }

    #[test]
    fn execution_actor_runs_and_completes() {
        let monitor = monitor();
        let id = monitor
            .start_operation("e1", ActorType::Execution, "run the build", json!({"n": 1}))
            .unwrap();
        assert_eq!(monitor.monitoring_status().active_operations, 1);

        let activity = monitor.complete_operation(&id, true).unwrap();
        assert_eq!(activity.status, ActivityStatus::Completed);
        assert!(activity.duration_ms.is_some());
        assert_eq!(monitor.monitoring_status().active_operations, 0);
    }

    #[test]
    fn unclassified_operations_default_to_analyze() {
        let monitor = monitor();
        let id = monitor
            .start_operation("p1", ActorType::Planning, "review the notes", json!(null))
            .unwrap();
        assert_eq!(
            monitor.activity(&id).unwrap().operation_type,
            OperationType::Analyze
        );
        // analyze is not an execution operation
        assert!(monitor
            .start_operation("e1", ActorType::Execution, "review the notes", json!(null))
            .is_err());
    }

    #[test]
    fn completing_unknown_operation_fails() {
        let err = monitor().complete_operation("op-missing", true).unwrap_err();
        assert!(matches!(err, OrchestratorError::OperationNotFound(_)));
    }

    #[test]
    fn endpoint_allowlist_is_per_role() {
        let monitor = monitor();
        assert!(monitor
            .monitor_api_call("e1", ActorType::Execution, "/api/files/src/lib.rs", &json!({}))
            .is_ok());
        let err = monitor
            .monitor_api_call("p1", ActorType::Planning, "/api/deploy", &json!({"env": "prod"}))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::EndpointUnauthorized { .. }));
        assert!(!err.is_boundary_violation());

        let recent = monitor.enforcer().recent_violations(1);
        assert_eq!(recent[0].violation_type, ViolationType::Api);
        assert_eq!(recent[0].severity, Severity::Critical);
    }

    #[test]
    fn endpoint_prefix_respects_segments() {
        let config = MonitorConfig::default();
        assert!(config.endpoint_allowed(ActorType::Execution, "/api/files?path=x"));
        assert!(!config.endpoint_allowed(ActorType::Execution, "/api/filesystem"));
    }

    #[test]
    fn expired_terminal_activities_are_collected() {
        let config = MonitorConfig {
            activity_ttl_secs: 0,
            ..MonitorConfig::default()
        };
        let monitor = RuntimeMonitor::new(config, Arc::new(BoundaryEnforcer::default()));
        let done = monitor
            .start_operation("e1", ActorType::Execution, "execute step", json!({}))
            .unwrap();
        let running = monitor
            .start_operation("e1", ActorType::Execution, "execute other", json!({}))
            .unwrap();
        monitor.complete_operation(&done, false).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert_eq!(monitor.collect_garbage(), 1);
        assert!(monitor.activity(&done).is_none());
        assert!(monitor.activity(&running).is_some());
    }

    #[test]
    fn content_check_records_violation() {
        let monitor = monitor();
        assert!(monitor
            .check_content("p1", ActorType::Planning, "import os\nconst x = 1;")
            .is_err());
        assert_eq!(monitor.violation_stats().by_type.get(&ViolationType::Content), Some(&1));
    }
}
