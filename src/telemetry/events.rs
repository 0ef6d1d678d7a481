//! Event schema for telemetry.

use crate::boundary::{ActorType, OperationType, ViolationAlert};
use crate::queue::InstructionStatus;
use crate::recovery::circuit::CircuitState;
use crate::recovery::classify::ErrorCode;
use crate::verification::gates::GateKind;
use serde::{Deserialize, Serialize};

/// Instruction queue lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstructionEvent {
    Queued {
        id: String,
        session_id: String,
        priority: i32,
    },
    Started {
        id: String,
        session_id: String,
    },
    Progress {
        id: String,
        session_id: String,
        status: InstructionStatus,
    },
    Completed {
        id: String,
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    Failed {
        id: String,
        session_id: String,
        error: String,
        retry_count: u32,
    },
    Retrying {
        id: String,
        session_id: String,
        retry_count: u32,
        max_retries: u32,
    },
    Cancelled {
        id: String,
        session_id: String,
    },
}

/// Runtime monitor observations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    Violation {
        alert: ViolationAlert,
    },
    OperationStarted {
        operation_id: String,
        actor_id: String,
        actor_type: ActorType,
        operation_type: OperationType,
    },
    OperationBlocked {
        actor_id: String,
        actor_type: ActorType,
        operation: String,
        reason: String,
    },
    OperationCompleted {
        operation_id: String,
        success: bool,
        duration_ms: u64,
    },
    ApiCallBlocked {
        actor_id: String,
        actor_type: ActorType,
        endpoint: String,
    },
}

/// Error handler activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryEvent {
    RetryAttempt {
        code: ErrorCode,
        attempt: u32,
        delay_ms: u64,
    },
    RecoverySucceeded {
        code: ErrorCode,
        attempts: u32,
    },
    RecoveryFailed {
        code: ErrorCode,
        attempts: u32,
        error: String,
    },
    CircuitTransition {
        code: ErrorCode,
        from: CircuitState,
        to: CircuitState,
    },
}

/// Verification gate decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateEvent {
    Passed {
        gate: GateKind,
        session_id: String,
    },
    Blocked {
        gate: GateKind,
        session_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", content = "event", rename_all = "snake_case")]
pub enum ConductorEvent {
    Instruction(InstructionEvent),
    Monitor(MonitorEvent),
    Recovery(RecoveryEvent),
    Gate(GateEvent),
}

impl From<InstructionEvent> for ConductorEvent {
    fn from(event: InstructionEvent) -> Self {
        ConductorEvent::Instruction(event)
    }
}

impl From<MonitorEvent> for ConductorEvent {
    fn from(event: MonitorEvent) -> Self {
        ConductorEvent::Monitor(event)
    }
}

impl From<RecoveryEvent> for ConductorEvent {
    fn from(event: RecoveryEvent) -> Self {
        ConductorEvent::Recovery(event)
    }
}

impl From<GateEvent> for ConductorEvent {
    fn from(event: GateEvent) -> Self {
        ConductorEvent::Gate(event)
    }
}

/// An event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq: u64,
    pub ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    pub event: ConductorEvent,
}
