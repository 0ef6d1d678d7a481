//! Inbound protocol shapes exchanged with the planning and execution collaborators.
//!
//! An `InstructionProtocol` is what the planning side hands over; an `ExecutionResult` is what
//! the execution side reports back. A `Session` ties them together for verification.

use crate::types::{new_id, now, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Planning output: what should be done and what will be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionProtocol {
    pub id: String,
    pub session_id: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub deliverables: Vec<DeliverableSpec>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    pub id: String,
    pub description: String,
}

/// A deliverable the planner promises, optionally anchored to a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverableSpec {
    #[serde(rename = "type")]
    pub kind: DeliverableKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliverableKind {
    File,
    Feature,
    Fix,
    Test,
    Documentation,
}

impl DeliverableKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliverableKind::File => "file",
            DeliverableKind::Feature => "feature",
            DeliverableKind::Fix => "fix",
            DeliverableKind::Test => "test",
            DeliverableKind::Documentation => "documentation",
        }
    }
}

impl InstructionProtocol {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            id: new_id("instr"),
            session_id: session_id.into(),
            objectives: Vec::new(),
            requirements: Vec::new(),
            deliverables: Vec::new(),
            constraints: Vec::new(),
            success_criteria: Vec::new(),
        }
    }

    pub fn with_objective(mut self, objective: impl Into<String>) -> Self {
        self.objectives.push(objective.into());
        self
    }

    pub fn with_requirement(mut self, description: impl Into<String>) -> Self {
        let id = format!("req-{}", self.requirements.len() + 1);
        self.requirements.push(Requirement {
            id,
            description: description.into(),
        });
        self
    }

    pub fn with_deliverable(
        mut self,
        kind: DeliverableKind,
        path: Option<&str>,
        description: impl Into<String>,
    ) -> Self {
        self.deliverables.push(DeliverableSpec {
            kind,
            path: path.map(str::to_string),
            description: description.into(),
        });
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn with_success_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.success_criteria.push(criterion.into());
        self
    }

    /// All free text authored by the planner, one entry per line, for content checks.
    pub fn planning_text(&self) -> String {
        let mut lines: Vec<&str> = Vec::new();
        lines.extend(self.objectives.iter().map(String::as_str));
        lines.extend(self.requirements.iter().map(|r| r.description.as_str()));
        lines.extend(self.deliverables.iter().map(|d| d.description.as_str()));
        lines.extend(self.constraints.iter().map(String::as_str));
        lines.extend(self.success_criteria.iter().map(String::as_str));
        lines.join("\n")
    }
}

/// Execution output reported back after an instruction ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub deliverables: Vec<DeliverableReport>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub metrics: ExecutionMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Partial,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverableReport {
    pub path: String,
    pub status: DeliverableStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliverableStatus {
    Created,
    Modified,
    Deleted,
    Failed,
}

impl DeliverableStatus {
    /// Whether the reported path now carries the promised work.
    pub fn is_delivered(self) -> bool {
        matches!(self, DeliverableStatus::Created | DeliverableStatus::Modified)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub files_changed: usize,
    #[serde(default)]
    pub tests_run: usize,
    #[serde(default)]
    pub tests_passed: usize,
}

impl ExecutionResult {
    pub fn new(status: ExecutionStatus) -> Self {
        Self {
            status,
            deliverables: Vec::new(),
            logs: Vec::new(),
            errors: Vec::new(),
            metrics: ExecutionMetrics::default(),
        }
    }

    pub fn success() -> Self {
        Self::new(ExecutionStatus::Success)
    }

    pub fn with_deliverable(mut self, path: impl Into<String>, status: DeliverableStatus) -> Self {
        self.deliverables.push(DeliverableReport {
            path: path.into(),
            status,
        });
        self
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }

    pub fn with_error(mut self, line: impl Into<String>) -> Self {
        self.errors.push(line.into());
        self
    }
}

/// One planning → execution → verification cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub started_at: Timestamp,
    #[serde(default)]
    pub ended_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
    Deployed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Deployed => "deployed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: SessionStatus::Active,
            started_at: now(),
            ended_at: None,
        }
    }

    /// Start a session with a generated id.
    pub fn start() -> Self {
        Self::new(new_id("sess"))
    }

    pub fn mark(&mut self, status: SessionStatus) {
        self.status = status;
        if status != SessionStatus::Active {
            self.ended_at = Some(now());
        }
    }
}
