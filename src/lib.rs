//! Conductor: planning/execution orchestration
//!
//! Two actors share a session: a planning actor produces instructions and an execution actor
//! carries them out. The crate keeps them inside their roles, queues and retries their work,
//! and verifies that what was promised before execution was actually delivered.

pub mod boundary;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod orchestrator;
pub mod protocol;
pub mod queue;
pub mod recovery;
pub mod telemetry;
pub mod types;
pub mod verification;

pub use error::{GateError, OrchestratorError, StorageError};
pub use orchestrator::{ExecutionAgent, FlowOutcome, Orchestrator, PlanningAgent};
