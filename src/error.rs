//! Error types for the conductor orchestration core.

use crate::boundary::{ActorType, OperationType};
use crate::queue::InstructionStatus;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Lifecycle transitions refused by a verification gate.
///
/// Every message names the blocked action so the surfaced text is actionable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("DEPLOYMENT BLOCKED: session {session_id} {reason}")]
    DeploymentBlocked { session_id: String, reason: String },

    #[error("COMPLETION BLOCKED: session {session_id} {reason}")]
    CompletionBlocked { session_id: String, reason: String },

    #[error("QUALITY GATE FAILED: session {session_id} scored {score}/100 (minimum {min_score})")]
    QualityBlocked {
        session_id: String,
        score: u8,
        min_score: u8,
    },
}

impl GateError {
    pub fn session_id(&self) -> &str {
        match self {
            GateError::DeploymentBlocked { session_id, .. }
            | GateError::CompletionBlocked { session_id, .. }
            | GateError::QualityBlocked { session_id, .. } => session_id,
        }
    }
}

/// Errors surfaced by the orchestration core
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Boundary violation: {actor_type} actor {actor_id} cannot perform {operation} operations")]
    BoundaryViolation {
        actor_id: String,
        actor_type: ActorType,
        operation: OperationType,
    },

    #[error("Boundary violation: {actor_type} content contains {signal}")]
    ContentViolation { actor_type: ActorType, signal: String },

    #[error("Boundary violation: method '{method}' is not available to {actor_type} actors")]
    MethodNotAllowed { method: String, actor_type: ActorType },

    #[error("Endpoint not authorized: {actor_type} actor {actor_id} cannot call {endpoint}")]
    EndpointUnauthorized {
        actor_id: String,
        actor_type: ActorType,
        endpoint: String,
    },

    #[error("Instruction queue is full ({capacity} active instructions)")]
    QueueFull { capacity: usize },

    #[error("Instruction not found: {0}")]
    InstructionNotFound(String),

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: InstructionStatus,
        to: InstructionStatus,
    },

    #[error("Retry not allowed for {id}: {reason}")]
    RetryNotAllowed { id: String, reason: String },

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Session contract already exists for {0}")]
    ContractExists(String),

    #[error("Session contract not found for {0}")]
    ContractNotFound(String),

    #[error("No execution result recorded for session {0}")]
    ExecutionResultMissing(String),

    #[error("Agent failed: {0}")]
    AgentFailed(String),

    #[error("External command failed: {0}")]
    ExternalCommand(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error(transparent)]
    Gate(#[from] GateError),
}

impl OrchestratorError {
    /// True for the errors that represent an actor stepping outside its role.
    pub fn is_boundary_violation(&self) -> bool {
        matches!(
            self,
            OrchestratorError::BoundaryViolation { .. }
                | OrchestratorError::ContentViolation { .. }
                | OrchestratorError::MethodNotAllowed { .. }
        )
    }
}

impl From<config::ConfigError> for OrchestratorError {
    fn from(err: config::ConfigError) -> Self {
        OrchestratorError::ConfigError(err.to_string())
    }
}

impl From<sled::Error> for OrchestratorError {
    fn from(err: sled::Error) -> Self {
        OrchestratorError::StorageError(StorageError::Database(err))
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::StorageError(StorageError::IoError(err))
    }
}
