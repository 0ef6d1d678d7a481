//! Instruction Queue
//!
//! Priority queue of planned instructions. Active records live in a map; a terminal transition
//! moves the record into a bounded history. `update_status` is the single mutation point for
//! status, and every mutation is written through to the optional durable store.

pub mod store;

use crate::error::OrchestratorError;
use crate::history::BoundedHistory;
use crate::protocol::{ExecutionResult, InstructionProtocol};
use crate::telemetry::{EventBus, InstructionEvent};
use crate::types::{millis_between, new_id, now, Timestamp};
use chrono::Duration as ChronoDuration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub use store::InstructionStore;

fn default_max_size() -> usize {
    1000
}

fn default_history_size() -> usize {
    500
}

fn default_priority() -> i32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

/// Queue capacity and defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of non-terminal instructions
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Terminal records kept before the oldest is evicted
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    #[serde(default = "default_priority")]
    pub default_priority: i32,

    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// sled directory for durable instruction records
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            history_size: default_history_size(),
            default_priority: default_priority(),
            default_max_retries: default_max_retries(),
            store_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructionStatus {
    Pending,
    Planning,
    Executing,
    Completed,
    Failed,
}

impl InstructionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstructionStatus::Pending => "pending",
            InstructionStatus::Planning => "planning",
            InstructionStatus::Executing => "executing",
            InstructionStatus::Completed => "completed",
            InstructionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InstructionStatus::Completed | InstructionStatus::Failed)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, InstructionStatus::Planning | InstructionStatus::Executing)
    }
}

impl fmt::Display for InstructionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedInstruction {
    pub id: String,
    pub session_id: String,
    pub instruction: InstructionProtocol,
    pub status: InstructionStatus,
    pub priority: i32,
    pub added_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub result: Option<ExecutionResult>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Enqueue order; breaks ties between equal priorities and timestamps
    pub seq: u64,
}

impl QueuedInstruction {
    pub fn can_retry(&self) -> bool {
        self.status == InstructionStatus::Failed && self.retry_count < self.max_retries
    }
}

/// Derived view over active and historical records
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub average_wait_ms: u64,
    pub average_execution_ms: u64,
    pub throughput_per_hour: usize,
}

struct QueueState {
    active: HashMap<String, QueuedInstruction>,
    history: BoundedHistory<String, QueuedInstruction>,
    next_seq: u64,
}

pub struct InstructionQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    store: Option<InstructionStore>,
    events: Option<EventBus>,
}

impl InstructionQueue {
    pub fn new(config: QueueConfig) -> Self {
        let history = BoundedHistory::new(config.history_size);
        Self {
            config,
            state: Mutex::new(QueueState {
                active: HashMap::new(),
                history,
                next_seq: 1,
            }),
            store: None,
            events: None,
        }
    }

    /// Build a queue backed by a durable store, restoring its records.
    ///
    /// Records that were planning or executing when the process stopped come back as pending.
    pub fn open(config: QueueConfig, store: InstructionStore) -> Result<Self, OrchestratorError> {
        let mut queue = Self::new(config);
        let records = store.load_all()?;
        let mut restored = 0usize;
        {
            let state = queue.state.get_mut();
            for mut record in records {
                state.next_seq = state.next_seq.max(record.seq + 1);
                if record.status.is_terminal() {
                    if let Some((evicted, _)) = state.history.insert(record.id.clone(), record) {
                        store.remove(&evicted)?;
                    }
                    continue;
                }
                if record.status.is_in_flight() {
                    record.status = InstructionStatus::Pending;
                    record.started_at = None;
                    store.put(&record)?;
                }
                restored += 1;
                state.active.insert(record.id.clone(), record);
            }
        }
        info!(
            restored,
            history = queue.state.get_mut().history.len(),
            "Instruction queue restored from store"
        );
        queue.store = Some(store);
        Ok(queue)
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn emit(&self, session_id: &str, event: InstructionEvent) {
        if let Some(events) = &self.events {
            events.emit(Some(session_id), event);
        }
    }

    fn persist(&self, record: &QueuedInstruction) -> Result<(), OrchestratorError> {
        if let Some(store) = &self.store {
            store.put(record)?;
        }
        Ok(())
    }

    fn archive(
        &self,
        state: &mut QueueState,
        record: QueuedInstruction,
    ) -> Result<(), OrchestratorError> {
        self.persist(&record)?;
        if let Some((evicted, _)) = state.history.insert(record.id.clone(), record) {
            debug!(instruction_id = %evicted, "History entry evicted");
            if let Some(store) = &self.store {
                store.remove(&evicted)?;
            }
        }
        Ok(())
    }

    /// Add an instruction; fails with `QueueFull` at capacity.
    pub fn enqueue(
        &self,
        instruction: InstructionProtocol,
        priority: i32,
        max_retries: u32,
    ) -> Result<String, OrchestratorError> {
        let mut state = self.state.lock();
        if state.active.len() >= self.config.max_size {
            warn!(capacity = self.config.max_size, "Instruction queue full");
            return Err(OrchestratorError::QueueFull {
                capacity: self.config.max_size,
            });
        }
        self.admit(&mut state, instruction, priority, max_retries)
    }

    /// Add several instructions, all or none.
    ///
    /// Capacity is checked for the whole batch up front. If a record cannot be stored, the
    /// records admitted so far are taken back out before the error is returned.
    pub fn enqueue_batch(
        &self,
        instructions: Vec<InstructionProtocol>,
        priority: i32,
        max_retries: u32,
    ) -> Result<Vec<String>, OrchestratorError> {
        let mut state = self.state.lock();
        if state.active.len() + instructions.len() > self.config.max_size {
            warn!(
                capacity = self.config.max_size,
                batch = instructions.len(),
                "Instruction queue cannot take the whole batch"
            );
            return Err(OrchestratorError::QueueFull {
                capacity: self.config.max_size,
            });
        }

        let mut ids = Vec::with_capacity(instructions.len());
        for instruction in instructions {
            match self.admit(&mut state, instruction, priority, max_retries) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    for id in &ids {
                        state.active.remove(id);
                        if let Some(store) = &self.store {
                            if let Err(undo) = store.remove(id) {
                                warn!(instruction_id = %id, error = %undo, "Could not unwind stored record");
                            }
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(ids)
    }

    /// Room left before `QueueFull`.
    pub fn remaining_capacity(&self) -> usize {
        self.config
            .max_size
            .saturating_sub(self.state.lock().active.len())
    }

    fn admit(
        &self,
        state: &mut QueueState,
        instruction: InstructionProtocol,
        priority: i32,
        max_retries: u32,
    ) -> Result<String, OrchestratorError> {
        let id = new_id("queued");
        let seq = state.next_seq;
        state.next_seq += 1;
        let record = QueuedInstruction {
            id: id.clone(),
            session_id: instruction.session_id.clone(),
            instruction,
            status: InstructionStatus::Pending,
            priority,
            added_at: now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
            seq,
        };
        self.persist(&record)?;

        debug!(
            instruction_id = %id,
            session_id = %record.session_id,
            priority,
            queue_size = state.active.len() + 1,
            "Instruction enqueued"
        );
        self.emit(
            &record.session_id,
            InstructionEvent::Queued {
                id: id.clone(),
                session_id: record.session_id.clone(),
                priority,
            },
        );
        state.active.insert(id.clone(), record);
        Ok(id)
    }

    /// Enqueue with the configured default priority and retry budget.
    pub fn enqueue_default(
        &self,
        instruction: InstructionProtocol,
    ) -> Result<String, OrchestratorError> {
        self.enqueue(
            instruction,
            self.config.default_priority,
            self.config.default_max_retries,
        )
    }

    /// Take the highest-priority pending instruction, oldest first among equals.
    pub fn dequeue(&self) -> Result<Option<QueuedInstruction>, OrchestratorError> {
        let mut state = self.state.lock();
        let next_id = state
            .active
            .values()
            .filter(|r| r.status == InstructionStatus::Pending)
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.added_at.cmp(&b.added_at))
                    .then_with(|| a.seq.cmp(&b.seq))
            })
            .map(|r| r.id.clone());

        let Some(id) = next_id else {
            return Ok(None);
        };
        let Some(record) = state.active.get_mut(&id) else {
            return Ok(None);
        };
        record.status = InstructionStatus::Planning;
        record.started_at = Some(now());
        let record = record.clone();
        self.persist(&record)?;

        debug!(
            instruction_id = %record.id,
            priority = record.priority,
            "Instruction dequeued"
        );
        self.emit(
            &record.session_id,
            InstructionEvent::Started {
                id: record.id.clone(),
                session_id: record.session_id.clone(),
            },
        );
        Ok(Some(record))
    }

    /// Move an instruction to a new status.
    ///
    /// Terminal statuses archive the record into history; a record can only reach a terminal
    /// status once. Returning to `pending` is reserved for [`InstructionQueue::retry`].
    pub fn update_status(
        &self,
        id: &str,
        status: InstructionStatus,
        result: Option<ExecutionResult>,
        error: Option<String>,
    ) -> Result<QueuedInstruction, OrchestratorError> {
        let mut state = self.state.lock();
        let Some(current) = state.active.get(id).map(|r| r.status) else {
            return Err(match state.history.get(&id.to_string()) {
                Some(record) => OrchestratorError::InvalidTransition {
                    id: id.to_string(),
                    from: record.status,
                    to: status,
                },
                None => OrchestratorError::InstructionNotFound(id.to_string()),
            });
        };
        if status == InstructionStatus::Pending && current != InstructionStatus::Pending {
            return Err(OrchestratorError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: status,
            });
        }

        if !status.is_terminal() {
            let record = match state.active.get_mut(id) {
                Some(record) => record,
                None => return Err(OrchestratorError::InstructionNotFound(id.to_string())),
            };
            record.status = status;
            if record.started_at.is_none() {
                record.started_at = Some(now());
            }
            if result.is_some() {
                record.result = result;
            }
            let record = record.clone();
            self.persist(&record)?;
            debug!(instruction_id = id, status = %status, "Instruction progressed");
            self.emit(
                &record.session_id,
                InstructionEvent::Progress {
                    id: id.to_string(),
                    session_id: record.session_id.clone(),
                    status,
                },
            );
            return Ok(record);
        }

        let Some(mut record) = state.active.remove(id) else {
            return Err(OrchestratorError::InstructionNotFound(id.to_string()));
        };
        let completed_at = now();
        record.status = status;
        record.completed_at = Some(completed_at);
        record.result = result;
        record.error = error;

        let event = if status == InstructionStatus::Completed {
            let duration_ms = record
                .started_at
                .map(|started| millis_between(&started, &completed_at));
            info!(
                instruction_id = id,
                session_id = %record.session_id,
                duration_ms = duration_ms.unwrap_or(0),
                "Instruction completed"
            );
            InstructionEvent::Completed {
                id: id.to_string(),
                session_id: record.session_id.clone(),
                duration_ms,
            }
        } else {
            let error = record
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            warn!(
                instruction_id = id,
                session_id = %record.session_id,
                retry_count = record.retry_count,
                error = %error,
                "Instruction failed"
            );
            InstructionEvent::Failed {
                id: id.to_string(),
                session_id: record.session_id.clone(),
                error,
                retry_count: record.retry_count,
            }
        };

        let session_id = record.session_id.clone();
        self.archive(&mut state, record.clone())?;
        self.emit(&session_id, event);
        Ok(record)
    }

    /// Re-admit a failed instruction whose retry budget is not exhausted.
    pub fn retry(&self, id: &str) -> Result<QueuedInstruction, OrchestratorError> {
        let mut state = self.state.lock();
        let key = id.to_string();
        let Some(record) = state.history.get(&key) else {
            return Err(match state.active.get(id) {
                Some(record) => OrchestratorError::RetryNotAllowed {
                    id: id.to_string(),
                    reason: format!("instruction is {}", record.status),
                },
                None => OrchestratorError::InstructionNotFound(id.to_string()),
            });
        };
        if record.status != InstructionStatus::Failed {
            return Err(OrchestratorError::RetryNotAllowed {
                id: id.to_string(),
                reason: format!("instruction is {}", record.status),
            });
        }
        if record.retry_count >= record.max_retries {
            return Err(OrchestratorError::RetryNotAllowed {
                id: id.to_string(),
                reason: format!("retry limit {} reached", record.max_retries),
            });
        }
        if state.active.len() >= self.config.max_size {
            return Err(OrchestratorError::QueueFull {
                capacity: self.config.max_size,
            });
        }

        let Some(mut record) = state.history.remove(&key) else {
            return Err(OrchestratorError::InstructionNotFound(id.to_string()));
        };
        record.status = InstructionStatus::Pending;
        record.retry_count += 1;
        record.result = None;
        record.error = None;
        record.completed_at = None;
        record.started_at = None;
        self.persist(&record)?;

        info!(
            instruction_id = id,
            retry_count = record.retry_count,
            max_retries = record.max_retries,
            "Instruction re-admitted for retry"
        );
        self.emit(
            &record.session_id,
            InstructionEvent::Retrying {
                id: id.to_string(),
                session_id: record.session_id.clone(),
                retry_count: record.retry_count,
                max_retries: record.max_retries,
            },
        );
        state.active.insert(key, record.clone());
        Ok(record)
    }

    /// Fail every pending instruction of a session. In-flight records are left alone.
    pub fn cancel_session(&self, session_id: &str) -> Result<Vec<String>, OrchestratorError> {
        let mut state = self.state.lock();
        let mut pending: Vec<(u64, String)> = state
            .active
            .values()
            .filter(|r| r.session_id == session_id && r.status == InstructionStatus::Pending)
            .map(|r| (r.seq, r.id.clone()))
            .collect();
        pending.sort();

        let mut cancelled = Vec::with_capacity(pending.len());
        for (_, id) in pending {
            let Some(mut record) = state.active.remove(&id) else {
                continue;
            };
            record.status = InstructionStatus::Failed;
            record.completed_at = Some(now());
            record.error = Some("cancelled".to_string());
            self.archive(&mut state, record)?;
            self.emit(
                session_id,
                InstructionEvent::Cancelled {
                    id: id.clone(),
                    session_id: session_id.to_string(),
                },
            );
            cancelled.push(id);
        }
        if !cancelled.is_empty() {
            info!(session_id, cancelled = cancelled.len(), "Session instructions cancelled");
        }
        Ok(cancelled)
    }

    pub fn get(&self, id: &str) -> Option<QueuedInstruction> {
        let state = self.state.lock();
        state
            .active
            .get(id)
            .or_else(|| state.history.get(&id.to_string()))
            .cloned()
    }

    /// Every record for a session, active and historical, in enqueue order.
    pub fn session_instructions(&self, session_id: &str) -> Vec<QueuedInstruction> {
        let state = self.state.lock();
        let mut records: Vec<QueuedInstruction> = state
            .active
            .values()
            .chain(state.history.values())
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.seq);
        records
    }

    /// Non-terminal records in enqueue order.
    pub fn active(&self) -> Vec<QueuedInstruction> {
        let state = self.state.lock();
        let mut records: Vec<QueuedInstruction> = state.active.values().cloned().collect();
        records.sort_by_key(|r| r.seq);
        records
    }

    /// Terminal records, oldest first.
    pub fn history(&self) -> Vec<QueuedInstruction> {
        self.state.lock().history.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().active.is_empty()
    }

    pub fn flush(&self) -> Result<(), OrchestratorError> {
        if let Some(store) = &self.store {
            store.flush()?;
        }
        Ok(())
    }

    pub fn clear_history(&self) -> Result<usize, OrchestratorError> {
        let mut state = self.state.lock();
        let ids: Vec<String> = state.history.values().map(|r| r.id.clone()).collect();
        state.history.clear();
        if let Some(store) = &self.store {
            for id in &ids {
                store.remove(id)?;
            }
        }
        Ok(ids.len())
    }

    /// Recomputed on every call from active and historical records.
    pub fn metrics(&self) -> QueueMetrics {
        let state = self.state.lock();
        let mut metrics = QueueMetrics {
            pending: 0,
            active: 0,
            completed: 0,
            failed: 0,
            total: state.active.len() + state.history.len(),
            average_wait_ms: 0,
            average_execution_ms: 0,
            throughput_per_hour: 0,
        };

        let hour_ago = now() - ChronoDuration::hours(1);
        let (mut wait_total, mut wait_count) = (0u64, 0u64);
        let (mut exec_total, mut exec_count) = (0u64, 0u64);

        for record in state.active.values().chain(state.history.values()) {
            match record.status {
                InstructionStatus::Pending => metrics.pending += 1,
                InstructionStatus::Planning | InstructionStatus::Executing => metrics.active += 1,
                InstructionStatus::Completed => metrics.completed += 1,
                InstructionStatus::Failed => metrics.failed += 1,
            }
            if let Some(started) = record.started_at {
                wait_total += millis_between(&record.added_at, &started);
                wait_count += 1;
                if let Some(completed) = record.completed_at {
                    exec_total += millis_between(&started, &completed);
                    exec_count += 1;
                }
            }
            if record.status == InstructionStatus::Completed
                && record.completed_at.is_some_and(|c| c > hour_ago)
            {
                metrics.throughput_per_hour += 1;
            }
        }

        if wait_count > 0 {
            metrics.average_wait_ms = wait_total / wait_count;
        }
        if exec_count > 0 {
            metrics.average_execution_ms = exec_total / exec_count;
        }
        metrics
    }
}
