//! Boundary Enforcer
//!
//! Stateless validation of operations and content against the actor's role, plus the
//! violation ledger every boundary component records into.

use crate::boundary::content::{classify_content, ContentClassification};
use crate::boundary::{
    ActorType, Operation, ViolationAlert, ViolationDetails, ViolationType,
};
use crate::error::OrchestratorError;
use crate::history::RingLog;
use crate::types::Severity;
use parking_lot::Mutex;
use tracing::warn;

const EXCERPT_CHARS: usize = 160;

/// Recent violations for quick inspection plus the full record for statistics.
struct ViolationLedger {
    recent: RingLog<ViolationAlert>,
    all: Vec<ViolationAlert>,
}

/// Validates actor operations and content
pub struct BoundaryEnforcer {
    ledger: Mutex<ViolationLedger>,
}

impl BoundaryEnforcer {
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            ledger: Mutex::new(ViolationLedger {
                recent: RingLog::new(recent_capacity),
                all: Vec::new(),
            }),
        }
    }

    /// Fail with `BoundaryViolation` unless the operation type belongs to the actor's role.
    pub fn validate_operation(&self, operation: &Operation) -> Result<(), OrchestratorError> {
        let actor = &operation.actor;
        if actor.actor_type.allows(operation.operation_type) {
            return Ok(());
        }
        Err(OrchestratorError::BoundaryViolation {
            actor_id: actor.id.clone(),
            actor_type: actor.actor_type,
            operation: operation.operation_type,
        })
    }

    /// Fail with `ContentViolation` when the text carries signals the role must not emit.
    ///
    /// Planning content must not contain code; execution content must not deliberate.
    pub fn validate_content(
        &self,
        text: &str,
        actor_type: ActorType,
    ) -> Result<ContentClassification, OrchestratorError> {
        let classification = classify_content(text);
        let disallowed = classification.disallowed_for(actor_type);
        match disallowed.first() {
            None => Ok(classification),
            Some(signal) => Err(OrchestratorError::ContentViolation {
                actor_type,
                signal: signal.to_string(),
            }),
        }
    }

    /// Build the alert for a refused operation. The caller decides whether to record it.
    pub fn operation_violation(
        operation: &Operation,
        severity: Severity,
        reason: &str,
    ) -> ViolationAlert {
        ViolationAlert::new(
            operation.actor.id.clone(),
            operation.actor.actor_type,
            ViolationType::Boundary,
            severity,
            reason,
            ViolationDetails::Operation {
                operation: operation.operation_type,
                description: operation.description.clone(),
            },
        )
    }

    /// Build the alert for refused content.
    pub fn content_violation(
        actor_id: &str,
        actor_type: ActorType,
        text: &str,
        classification: &ContentClassification,
        severity: Severity,
    ) -> ViolationAlert {
        let signals: Vec<String> = classification
            .disallowed_for(actor_type)
            .iter()
            .map(|s| s.to_string())
            .collect();
        let description = format!(
            "{} content contains {}",
            actor_type,
            signals.join(", ")
        );
        ViolationAlert::new(
            actor_id,
            actor_type,
            ViolationType::Content,
            severity,
            description,
            ViolationDetails::Content {
                signals,
                excerpt: text.chars().take(EXCERPT_CHARS).collect(),
            },
        )
    }

    /// Append an alert to the ledger.
    pub fn record_violation(&self, alert: ViolationAlert) {
        warn!(
            violation_id = %alert.id,
            actor_id = %alert.actor_id,
            actor_type = %alert.actor_type,
            violation_type = ?alert.violation_type,
            severity = %alert.severity,
            blocked = alert.blocked,
            "Boundary violation recorded: {}",
            alert.description
        );
        let mut ledger = self.ledger.lock();
        ledger.recent.push(alert.clone());
        ledger.all.push(alert);
    }

    /// Up to `limit` most recent alerts, newest first.
    pub fn recent_violations(&self, limit: usize) -> Vec<ViolationAlert> {
        self.ledger
            .lock()
            .recent
            .recent(limit)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Every alert ever recorded, oldest first.
    pub fn violation_history(&self) -> Vec<ViolationAlert> {
        self.ledger.lock().all.clone()
    }

    pub fn violation_count(&self) -> usize {
        self.ledger.lock().all.len()
    }

    pub fn clear_violations(&self) {
        let mut ledger = self.ledger.lock();
        ledger.recent.clear();
        ledger.all.clear();
    }
}

impl Default for BoundaryEnforcer {
    fn default() -> Self {
        Self::new(100)
    }
}
