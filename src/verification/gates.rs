//! Verification gates: lifecycle transitions that require a verified session.

use crate::error::GateError;
use crate::protocol::{ExecutionResult, Session};
use crate::telemetry::{EventBus, GateEvent};
use crate::verification::report::parse_score;
use crate::verification::{VerificationEngine, VerificationResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    PreDeployment,
    SessionCompletion,
    Quality,
    Continuous,
    Rollback,
}

impl GateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GateKind::PreDeployment => "pre_deployment",
            GateKind::SessionCompletion => "session_completion",
            GateKind::Quality => "quality",
            GateKind::Continuous => "continuous",
            GateKind::Rollback => "rollback",
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct VerificationGates {
    engine: Arc<VerificationEngine>,
    strict: bool,
    min_score: u8,
    events: Option<EventBus>,
}

impl VerificationGates {
    /// Strictness and the default quality threshold come from the engine's config.
    pub fn new(engine: Arc<VerificationEngine>) -> Self {
        let strict = engine.config().strict;
        let min_score = engine.config().min_score;
        Self {
            engine,
            strict,
            min_score,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn engine(&self) -> &Arc<VerificationEngine> {
        &self.engine
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Refuses deployment unless the latest verification result is verified.
    pub fn pre_deployment_gate(&self, session_id: &str) -> Result<(), GateError> {
        let outcome = match self.engine.latest_result(session_id) {
            None => Err(GateError::DeploymentBlocked {
                session_id: session_id.to_string(),
                reason: "has no verification results".to_string(),
            }),
            Some(result) if !result.verified => Err(GateError::DeploymentBlocked {
                session_id: session_id.to_string(),
                reason: format!("failed verification ({})", summarize(&result)),
            }),
            Some(_) => Ok(()),
        };
        self.observe(GateKind::PreDeployment, session_id, outcome)
    }

    /// Verifies the session's execution result. In strict mode an unverified session cannot
    /// complete; otherwise the failure is logged and completion proceeds.
    pub async fn session_completion_gate(
        &self,
        session: &Session,
        result: &ExecutionResult,
    ) -> Result<VerificationResult, GateError> {
        let verification = self.engine.verify_session(&session.id, result).await;
        if verification.verified {
            self.observe(GateKind::SessionCompletion, &session.id, Ok(()))?;
            return Ok(verification);
        }
        if self.strict {
            let err = GateError::CompletionBlocked {
                session_id: session.id.clone(),
                reason: format!("failed verification ({})", summarize(&verification)),
            };
            self.observe(GateKind::SessionCompletion, &session.id, Err(err))?;
        }
        warn!(
            session_id = %session.id,
            score = verification.verification_score,
            "Session completing without verification"
        );
        Ok(verification)
    }

    /// Score parsed from the session report must reach `min_score` (or the configured default).
    pub fn quality_gate(&self, session_id: &str, min_score: Option<u8>) -> Result<u8, GateError> {
        let min_score = min_score.unwrap_or(self.min_score);
        let report = self.engine.generate_report(session_id);
        let score = parse_score(&report).unwrap_or(0);
        let outcome = if score < min_score {
            Err(GateError::QualityBlocked {
                session_id: session_id.to_string(),
                score,
                min_score,
            })
        } else {
            Ok(())
        };
        self.observe(GateKind::Quality, session_id, outcome)?;
        Ok(score)
    }

    /// Re-verify every session independently and report which would pass deployment.
    pub async fn continuous_verification_gate(&self, session_ids: &[String]) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        for session_id in session_ids {
            if self.engine.has_execution_result(session_id) {
                if let Err(err) = self.engine.reverify(session_id).await {
                    warn!(session_id = %session_id, error = %err, "Re-verification failed");
                }
            }
            let passed = self.pre_deployment_gate(session_id).is_ok();
            results.insert(session_id.clone(), passed);
        }
        let passed = results.values().filter(|p| **p).count();
        info!(sessions = results.len(), passed, "Continuous verification finished");
        results
    }

    /// True when a deployed session no longer verifies and must be rolled back.
    pub async fn rollback_gate(&self, session_id: &str, deployment_id: &str) -> bool {
        let required = match self.engine.reverify(session_id).await {
            Err(err) => {
                warn!(session_id, deployment_id, error = %err, "Re-verification impossible");
                true
            }
            Ok(_) => self.pre_deployment_gate(session_id).is_err(),
        };
        if required {
            warn!(session_id, deployment_id, "Rollback required");
            self.emit(GateEvent::Blocked {
                gate: GateKind::Rollback,
                session_id: session_id.to_string(),
                reason: format!("deployment {} no longer verifies", deployment_id),
            });
        } else {
            info!(session_id, deployment_id, "Deployment still verifies");
            self.emit(GateEvent::Passed {
                gate: GateKind::Rollback,
                session_id: session_id.to_string(),
            });
        }
        required
    }

    fn observe(
        &self,
        gate: GateKind,
        session_id: &str,
        outcome: Result<(), GateError>,
    ) -> Result<(), GateError> {
        match &outcome {
            Ok(()) => {
                info!(gate = %gate, session_id, "Gate passed");
                self.emit(GateEvent::Passed {
                    gate,
                    session_id: session_id.to_string(),
                });
            }
            Err(err) => {
                warn!(gate = %gate, session_id, error = %err, "Gate blocked");
                self.emit(GateEvent::Blocked {
                    gate,
                    session_id: session_id.to_string(),
                    reason: err.to_string(),
                });
            }
        }
        outcome
    }

    fn emit(&self, event: GateEvent) {
        if let Some(events) = &self.events {
            let session = match &event {
                GateEvent::Passed { session_id, .. } | GateEvent::Blocked { session_id, .. } => {
                    session_id.clone()
                }
            };
            events.emit(Some(&session), event);
        }
    }
}

fn summarize(result: &VerificationResult) -> String {
    let mut summary = format!("score {}/100", result.verification_score);
    if !result.missing_deliverables.is_empty() {
        summary.push_str(&format!(
            ", missing: {}",
            result.missing_deliverables.join(", ")
        ));
    }
    summary
}
