//! Actor Boundary Model
//!
//! Two fixed roles share the system: the planning actor decides what to do, the execution
//! actor does it. Each role has a fixed, non-overlapping capability set. Everything an actor
//! does passes through [`enforcer::BoundaryEnforcer`], observed by [`monitor::RuntimeMonitor`].

pub mod content;
pub mod enforcer;
pub mod monitor;
pub mod proxy;

use crate::types::{new_id, now, Severity, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

pub use content::{classify_content, classify_operation, ContentClassification, ContentSignal};
pub use enforcer::BoundaryEnforcer;
pub use monitor::{MonitorConfig, RuntimeMonitor};
pub use proxy::{ActorSurface, BoundaryProxy, MethodWhitelist};

/// Role an actor plays in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    /// Produces instructions; never touches code
    Planning,
    /// Carries instructions out; never deliberates strategy
    Execution,
}

const PLANNING_CAPABILITIES: &[&str] = &["analyze", "plan", "decide", "strategize"];
const EXECUTION_CAPABILITIES: &[&str] = &["execute", "implement", "run", "deploy"];

impl ActorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorType::Planning => "planning",
            ActorType::Execution => "execution",
        }
    }

    /// Capability names fixed for this role.
    pub fn capabilities(self) -> &'static [&'static str] {
        match self {
            ActorType::Planning => PLANNING_CAPABILITIES,
            ActorType::Execution => EXECUTION_CAPABILITIES,
        }
    }

    /// Operation types this role may perform.
    pub fn allowed_operations(self) -> &'static [OperationType] {
        match self {
            ActorType::Planning => &[
                OperationType::Plan,
                OperationType::Analyze,
                OperationType::Decide,
            ],
            ActorType::Execution => &[OperationType::Execute],
        }
    }

    pub fn allows(self, operation: OperationType) -> bool {
        self.allowed_operations().contains(&operation)
    }
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planning" | "planner" => Ok(ActorType::Planning),
            "execution" | "executor" => Ok(ActorType::Execution),
            other => Err(format!("unknown actor type '{}'", other)),
        }
    }
}

/// Actor identity with its role-derived capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    pub capabilities: BTreeSet<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>, actor_type: ActorType) -> Self {
        Self {
            id: id.into(),
            actor_type,
            capabilities: actor_type
                .capabilities()
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }

    pub fn planning(id: impl Into<String>) -> Self {
        Self::new(id, ActorType::Planning)
    }

    pub fn execution(id: impl Into<String>) -> Self {
        Self::new(id, ActorType::Execution)
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Plan,
    Execute,
    Analyze,
    Decide,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Plan => "plan",
            OperationType::Execute => "execute",
            OperationType::Analyze => "analyze",
            OperationType::Decide => "decide",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single attempted operation. Created per call, validated, then dropped or logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    pub actor: Actor,
    pub description: String,
    pub timestamp: Timestamp,
}

impl Operation {
    pub fn new(operation_type: OperationType, actor: Actor, description: impl Into<String>) -> Self {
        Self {
            operation_type,
            actor,
            description: description.into(),
            timestamp: now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationType {
    Boundary,
    Content,
    Method,
    Api,
}

/// What exactly was refused, per violation type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationDetails {
    Operation {
        operation: OperationType,
        description: String,
    },
    Content {
        signals: Vec<String>,
        excerpt: String,
    },
    Method {
        method: String,
    },
    Api {
        endpoint: String,
        payload: Value,
    },
}

/// Immutable record of a refused action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationAlert {
    pub id: String,
    pub actor_id: String,
    pub actor_type: ActorType,
    pub violation_type: ViolationType,
    pub description: String,
    pub severity: Severity,
    pub timestamp: Timestamp,
    pub blocked: bool,
    pub details: ViolationDetails,
}

impl ViolationAlert {
    pub fn new(
        actor_id: impl Into<String>,
        actor_type: ActorType,
        violation_type: ViolationType,
        severity: Severity,
        description: impl Into<String>,
        details: ViolationDetails,
    ) -> Self {
        Self {
            id: new_id("violation"),
            actor_id: actor_id.into(),
            actor_type,
            violation_type,
            description: description.into(),
            severity,
            timestamp: now(),
            blocked: true,
            details,
        }
    }
}
