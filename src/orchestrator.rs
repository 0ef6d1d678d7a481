//! Instruction flow engine
//!
//! [`Orchestrator`] owns one of each component and drives a session through its lifecycle:
//! planning content is checked, a contract is written, instructions are queued, and each
//! dequeued instruction runs as a monitored planning step followed by a monitored execution
//! step. Failures go to the error handler; retryable ones are re-admitted to the queue. When a
//! session's last instruction finishes, the completion gate decides its fate.

use crate::boundary::{Actor, ActorType, BoundaryEnforcer, RuntimeMonitor};
use crate::config::ConductorConfig;
use crate::error::{GateError, OrchestratorError};
use crate::protocol::{ExecutionResult, ExecutionStatus, InstructionProtocol, Session, SessionStatus};
use crate::queue::{InstructionQueue, InstructionStatus, InstructionStore, QueuedInstruction};
use crate::recovery::{ErrorCode, ErrorContext, ErrorHandler, RawError, RecoveryOutcome};
use crate::telemetry::EventBus;
use crate::types::new_id;
use crate::verification::{VerificationEngine, VerificationGates, VerificationResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns a user request into instructions.
#[async_trait]
pub trait PlanningAgent: Send + Sync {
    fn actor(&self) -> &Actor;

    async fn plan(
        &self,
        session: &Session,
        request: &str,
    ) -> Result<Vec<InstructionProtocol>, OrchestratorError>;
}

/// Carries out a single instruction.
#[async_trait]
pub trait ExecutionAgent: Send + Sync {
    fn actor(&self) -> &Actor;

    async fn execute(
        &self,
        instruction: &InstructionProtocol,
    ) -> Result<ExecutionResult, OrchestratorError>;
}

/// What one turn of the flow engine did
#[derive(Debug)]
pub enum FlowOutcome {
    /// Nothing pending
    Idle,
    /// Instruction completed; `verification` is set when it was the session's last one
    Completed {
        instruction_id: String,
        session_id: String,
        verification: Option<VerificationResult>,
    },
    /// Instruction failed with a retryable error and was re-admitted
    Retrying {
        instruction_id: String,
        code: ErrorCode,
        retry_count: u32,
    },
    /// Instruction failed for good
    Failed {
        instruction_id: String,
        code: ErrorCode,
        error: String,
    },
    /// Instruction completed but the session did not pass its completion gate
    Blocked {
        instruction_id: String,
        error: GateError,
    },
}

pub struct Orchestrator {
    events: EventBus,
    monitor: RuntimeMonitor,
    queue: InstructionQueue,
    errors: ErrorHandler,
    engine: Arc<VerificationEngine>,
    gates: VerificationGates,
    planner: Arc<dyn PlanningAgent>,
    executor: Arc<dyn ExecutionAgent>,
    sessions: Mutex<HashMap<String, Session>>,
    /// Instructions re-admitted after a deferred recovery, with the code they failed on
    deferred: Mutex<HashMap<String, ErrorCode>>,
}

impl Orchestrator {
    pub fn new(
        config: &ConductorConfig,
        workspace: impl Into<PathBuf>,
        planner: Arc<dyn PlanningAgent>,
        executor: Arc<dyn ExecutionAgent>,
    ) -> Result<Self, OrchestratorError> {
        let engine = VerificationEngine::new(workspace, config.verification.clone());
        Self::from_parts(config, engine, planner, executor)
    }

    /// Build around a prepared verification engine (custom evidence runner or change source).
    pub fn from_parts(
        config: &ConductorConfig,
        engine: VerificationEngine,
        planner: Arc<dyn PlanningAgent>,
        executor: Arc<dyn ExecutionAgent>,
    ) -> Result<Self, OrchestratorError> {
        if planner.actor().actor_type != ActorType::Planning {
            return Err(OrchestratorError::ConfigError(format!(
                "planning agent {} is a {} actor",
                planner.actor().id,
                planner.actor().actor_type
            )));
        }
        if executor.actor().actor_type != ActorType::Execution {
            return Err(OrchestratorError::ConfigError(format!(
                "execution agent {} is a {} actor",
                executor.actor().id,
                executor.actor().actor_type
            )));
        }

        let events = EventBus::new();
        let enforcer = Arc::new(BoundaryEnforcer::new(config.monitor.recent_violations));
        let monitor =
            RuntimeMonitor::new(config.monitor.clone(), enforcer).with_events(events.clone());
        let queue = match &config.queue.store_path {
            Some(path) => {
                InstructionQueue::open(config.queue.clone(), InstructionStore::open(path)?)?
            }
            None => InstructionQueue::new(config.queue.clone()),
        }
        .with_events(events.clone());
        let errors = ErrorHandler::new(config.recovery.clone()).with_events(events.clone());
        let engine = Arc::new(engine);
        let gates = VerificationGates::new(engine.clone()).with_events(events.clone());

        Ok(Self {
            events,
            monitor,
            queue,
            errors,
            engine,
            gates,
            planner,
            executor,
            sessions: Mutex::new(HashMap::new()),
            deferred: Mutex::new(HashMap::new()),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn monitor(&self) -> &RuntimeMonitor {
        &self.monitor
    }

    pub fn queue(&self) -> &InstructionQueue {
        &self.queue
    }

    pub fn errors(&self) -> &ErrorHandler {
        &self.errors
    }

    pub fn engine(&self) -> &Arc<VerificationEngine> {
        &self.engine
    }

    pub fn gates(&self) -> &VerificationGates {
        &self.gates
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions.lock().get(session_id).cloned()
    }

    fn set_session_status(&self, session_id: &str, status: SessionStatus) {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id));
        session.mark(status);
        info!(session_id, status = %status, "Session status changed");
    }

    /// Check the planner's text, write the contract, and queue every instruction.
    ///
    /// Nothing is left behind on failure: a session the queue cannot take gets no contract.
    pub fn submit(
        &self,
        session: &Session,
        instructions: Vec<InstructionProtocol>,
        priority: Option<i32>,
    ) -> Result<Vec<String>, OrchestratorError> {
        let planner = self.planner.actor();
        for instruction in &instructions {
            self.monitor
                .check_content(&planner.id, planner.actor_type, &instruction.planning_text())?;
        }

        if instructions.len() > self.queue.remaining_capacity() {
            return Err(OrchestratorError::QueueFull {
                capacity: self.queue.config().max_size,
            });
        }

        self.engine.create_session_contract(session, &instructions)?;

        let priority = priority.unwrap_or(self.queue.config().default_priority);
        let max_retries = self.queue.config().default_max_retries;
        let instructions = instructions
            .into_iter()
            .map(|mut instruction| {
                instruction.session_id = session.id.clone();
                instruction
            })
            .collect();
        let ids = match self.queue.enqueue_batch(instructions, priority, max_retries) {
            Ok(ids) => ids,
            Err(err) => {
                self.engine.discard_session_contract(&session.id)?;
                return Err(err);
            }
        };
        self.sessions
            .lock()
            .entry(session.id.clone())
            .or_insert_with(|| session.clone());
        info!(session_id = %session.id, instructions = ids.len(), "Session submitted");
        Ok(ids)
    }

    /// Ask the planning agent for instructions, then [`submit`](Self::submit) them.
    pub async fn plan_and_submit(
        &self,
        request: &str,
    ) -> Result<(Session, Vec<String>), OrchestratorError> {
        let session = Session::start();
        let planner = self.planner.actor().clone();
        let op = self.monitor.start_operation(
            &planner.id,
            planner.actor_type,
            "plan user request",
            json!({ "sessionId": session.id }),
        )?;
        let planned = self.planner.plan(&session, request).await;
        self.monitor.complete_operation(&op, planned.is_ok())?;
        let ids = self.submit(&session, planned?, None)?;
        Ok((session, ids))
    }

    /// Run the next pending instruction to a terminal state.
    pub async fn run_next(&self) -> Result<FlowOutcome, OrchestratorError> {
        let Some(record) = self.queue.dequeue()? else {
            return Ok(FlowOutcome::Idle);
        };
        let planner = self.planner.actor().clone();
        let executor = self.executor.actor().clone();
        let metadata = json!({ "instructionId": record.id, "sessionId": record.session_id });

        let op = self.monitor.start_operation(
            &planner.id,
            planner.actor_type,
            "analyze instruction",
            metadata.clone(),
        )?;
        let checked = self.monitor.check_content(
            &planner.id,
            planner.actor_type,
            &record.instruction.planning_text(),
        );
        self.monitor.complete_operation(&op, checked.is_ok())?;
        if let Err(err) = checked {
            return self.fail(&record, None, err, &planner).await;
        }

        self.queue
            .update_status(&record.id, InstructionStatus::Executing, None, None)?;
        let op = match self.monitor.start_operation(
            &executor.id,
            executor.actor_type,
            "execute instruction",
            metadata,
        ) {
            Ok(op) => op,
            Err(err) => return self.fail(&record, None, err, &executor).await,
        };

        let executed = self.executor.execute(&record.instruction).await;
        let succeeded = matches!(&executed, Ok(result) if result.status != ExecutionStatus::Failure);
        self.monitor.complete_operation(&op, succeeded)?;

        match executed {
            Ok(result) if result.status == ExecutionStatus::Failure => {
                let message = if result.errors.is_empty() {
                    "execution failed".to_string()
                } else {
                    result.errors.join("; ")
                };
                let err = OrchestratorError::AgentFailed(message);
                self.fail(&record, Some(result), err, &executor).await
            }
            Ok(result) => self.complete(&record, result).await,
            Err(err) => self.fail(&record, None, err, &executor).await,
        }
    }

    /// Drain the queue, one instruction at a time.
    pub async fn run_until_idle(&self) -> Result<Vec<FlowOutcome>, OrchestratorError> {
        let mut outcomes = Vec::new();
        loop {
            match self.run_next().await? {
                FlowOutcome::Idle => return Ok(outcomes),
                outcome => outcomes.push(outcome),
            }
        }
    }

    async fn complete(
        &self,
        record: &QueuedInstruction,
        result: ExecutionResult,
    ) -> Result<FlowOutcome, OrchestratorError> {
        self.queue.update_status(
            &record.id,
            InstructionStatus::Completed,
            Some(result),
            None,
        )?;
        if let Some(code) = self.deferred.lock().remove(&record.id) {
            self.errors.record_recovery(code);
        }

        let instructions = self.queue.session_instructions(&record.session_id);
        if instructions.iter().any(|i| !i.status.is_terminal()) {
            debug!(session_id = %record.session_id, "Session still has open instructions");
            return Ok(FlowOutcome::Completed {
                instruction_id: record.id.clone(),
                session_id: record.session_id.clone(),
                verification: None,
            });
        }

        let merged = merge_results(
            instructions
                .iter()
                .filter(|i| i.status == InstructionStatus::Completed)
                .filter_map(|i| i.result.as_ref()),
        );
        let session = self
            .session(&record.session_id)
            .unwrap_or_else(|| Session::new(&record.session_id));
        match self.gates.session_completion_gate(&session, &merged).await {
            Ok(verification) => {
                self.set_session_status(&record.session_id, SessionStatus::Completed);
                Ok(FlowOutcome::Completed {
                    instruction_id: record.id.clone(),
                    session_id: record.session_id.clone(),
                    verification: Some(verification),
                })
            }
            Err(error) => {
                self.set_session_status(&record.session_id, SessionStatus::Failed);
                Ok(FlowOutcome::Blocked {
                    instruction_id: record.id.clone(),
                    error,
                })
            }
        }
    }

    async fn fail(
        &self,
        record: &QueuedInstruction,
        result: Option<ExecutionResult>,
        err: OrchestratorError,
        actor: &Actor,
    ) -> Result<FlowOutcome, OrchestratorError> {
        let message = err.to_string();
        let failed = self.queue.update_status(
            &record.id,
            InstructionStatus::Failed,
            result,
            Some(message.clone()),
        )?;

        let context = ErrorContext::new()
            .actor(actor.actor_type.as_str(), actor.id.clone())
            .operation(format!("instruction {}", record.id))
            .retry_count(failed.retry_count)
            .extra(json!({ "sessionId": record.session_id }));
        let handled = self.errors.handle_error(RawError::from(&err), context).await;
        let code = handled.error.code;

        let retry_config = self.errors.retry_config_for(code);
        let attempts = failed.retry_count + 1;
        let within_attempts = retry_config
            .as_ref()
            .map_or(true, |config| attempts < config.max_attempts);
        let retry = matches!(
            handled.outcome,
            RecoveryOutcome::Deferred | RecoveryOutcome::Recovered
        ) && failed.can_retry()
            && within_attempts;
        if !retry {
            if !within_attempts {
                info!(instruction_id = %record.id, code = %code, attempts, "Attempt limit for error code reached");
            }
            self.deferred.lock().remove(&record.id);
            if self
                .queue
                .session_instructions(&record.session_id)
                .iter()
                .all(|i| i.status.is_terminal())
            {
                self.set_session_status(&record.session_id, SessionStatus::Failed);
            }
            return Ok(FlowOutcome::Failed {
                instruction_id: record.id.clone(),
                code,
                error: message,
            });
        }

        if let Some(config) = retry_config {
            let delay = config.calculate_delay(attempts);
            debug!(instruction_id = %record.id, delay_ms = delay.as_millis() as u64, "Backing off before re-admission");
            tokio::time::sleep(delay).await;
        }
        let readmitted = self.queue.retry(&record.id)?;
        self.deferred.lock().insert(record.id.clone(), code);
        Ok(FlowOutcome::Retrying {
            instruction_id: record.id.clone(),
            code,
            retry_count: readmitted.retry_count,
        })
    }

    /// Deploy a verified session. Returns the deployment id.
    pub fn deploy(&self, session_id: &str) -> Result<String, OrchestratorError> {
        self.gates.pre_deployment_gate(session_id)?;
        let executor = self.executor.actor();
        let op = self.monitor.start_operation(
            &executor.id,
            executor.actor_type,
            "deploy session",
            json!({ "sessionId": session_id }),
        )?;
        self.monitor.complete_operation(&op, true)?;
        let deployment_id = new_id("deploy");
        self.set_session_status(session_id, SessionStatus::Deployed);
        info!(session_id, deployment_id = %deployment_id, "Session deployed");
        Ok(deployment_id)
    }

    /// True when a deployment no longer verifies.
    pub async fn rollback_required(&self, session_id: &str, deployment_id: &str) -> bool {
        self.gates.rollback_gate(session_id, deployment_id).await
    }

    /// Fail the session's pending instructions. Running ones finish on their own.
    pub fn cancel_session(&self, session_id: &str) -> Result<Vec<String>, OrchestratorError> {
        let cancelled = self.queue.cancel_session(session_id)?;
        if self
            .queue
            .session_instructions(session_id)
            .iter()
            .all(|i| i.status.is_terminal())
        {
            self.set_session_status(session_id, SessionStatus::Cancelled);
        } else {
            warn!(session_id, "Session cancelled with instructions still running");
        }
        Ok(cancelled)
    }
}

/// One result for the whole session: every deliverable, the worst status.
pub fn merge_results<'a>(results: impl IntoIterator<Item = &'a ExecutionResult>) -> ExecutionResult {
    let mut merged = ExecutionResult::new(ExecutionStatus::Success);
    let mut seen = false;
    for result in results {
        seen = true;
        merged.status = match (merged.status, result.status) {
            (ExecutionStatus::Failure, _) | (_, ExecutionStatus::Failure) => ExecutionStatus::Failure,
            (ExecutionStatus::Partial, _) | (_, ExecutionStatus::Partial) => ExecutionStatus::Partial,
            _ => ExecutionStatus::Success,
        };
        merged
            .deliverables
            .extend(result.deliverables.iter().cloned());
        merged.logs.extend(result.logs.iter().cloned());
        merged.errors.extend(result.errors.iter().cloned());
    }
    if !seen {
        merged.status = ExecutionStatus::Failure;
    }
    merged
}
