//! Shared fixtures: scripted agents and a verification engine with canned checks.

use async_trait::async_trait;
use conductor::boundary::Actor;
use conductor::error::OrchestratorError;
use conductor::orchestrator::{ExecutionAgent, PlanningAgent};
use conductor::protocol::{
    DeliverableKind, DeliverableStatus, ExecutionResult, ExecutionStatus, InstructionProtocol,
    Session,
};
use conductor::verification::{
    StaticChangeSource, StaticEvidenceRunner, VerificationConfig, VerificationEngine,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

pub fn passing_runner() -> StaticEvidenceRunner {
    StaticEvidenceRunner::new()
        .with_exit("cargo build", 0)
        .with_exit("cargo check", 0)
        .with_exit("cargo test", 0)
}

pub fn engine(workspace: &Path, runner: StaticEvidenceRunner) -> VerificationEngine {
    VerificationEngine::new(workspace, VerificationConfig::default())
        .with_runner(Arc::new(runner))
        .with_change_source(Arc::new(StaticChangeSource::default()))
}

pub fn service_instruction(session_id: &str) -> InstructionProtocol {
    InstructionProtocol::new(session_id)
        .with_objective("Add a caching service")
        .with_requirement("Implement the cache service")
        .with_deliverable(DeliverableKind::File, Some("src/service.rs"), "cache service module")
}

pub fn delivered_service() -> ExecutionResult {
    ExecutionResult::new(ExecutionStatus::Success)
        .with_deliverable("src/service.rs", DeliverableStatus::Created)
}

pub struct ScriptedPlanner {
    actor: Actor,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self {
            actor: Actor::planning("planner-1"),
        }
    }
}

#[async_trait]
impl PlanningAgent for ScriptedPlanner {
    fn actor(&self) -> &Actor {
        &self.actor
    }

    async fn plan(
        &self,
        session: &Session,
        _request: &str,
    ) -> Result<Vec<InstructionProtocol>, OrchestratorError> {
        Ok(vec![service_instruction(&session.id)])
    }
}

/// Replays scripted responses, then repeats the fallback.
pub struct ScriptedExecutor {
    actor: Actor,
    script: Mutex<VecDeque<Result<ExecutionResult, String>>>,
    fallback: ExecutionResult,
    calls: Mutex<usize>,
}

impl ScriptedExecutor {
    pub fn new(fallback: ExecutionResult) -> Self {
        Self {
            actor: Actor::execution("executor-1"),
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: Mutex::new(0),
        }
    }

    pub fn then_fail(self, message: &str) -> Self {
        self.script.lock().push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl ExecutionAgent for ScriptedExecutor {
    fn actor(&self) -> &Actor {
        &self.actor
    }

    async fn execute(
        &self,
        _instruction: &InstructionProtocol,
    ) -> Result<ExecutionResult, OrchestratorError> {
        *self.calls.lock() += 1;
        match self.script.lock().pop_front() {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(OrchestratorError::AgentFailed(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}
