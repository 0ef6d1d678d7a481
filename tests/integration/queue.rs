//! Instruction queue: ordering, retry budget, durability

use conductor::error::OrchestratorError;
use conductor::protocol::{ExecutionResult, InstructionProtocol};
use conductor::queue::{InstructionQueue, InstructionStatus, InstructionStore, QueueConfig};
use tempfile::TempDir;

fn instruction(session: &str, objective: &str) -> InstructionProtocol {
    InstructionProtocol::new(session).with_objective(objective)
}

#[test]
fn test_highest_priority_is_dequeued_first() {
    let queue = InstructionQueue::new(QueueConfig::default());
    let low = queue.enqueue(instruction("s1", "low"), 1, 3).unwrap();
    let high = queue.enqueue(instruction("s1", "high"), 9, 3).unwrap();
    let mid = queue.enqueue(instruction("s1", "mid"), 5, 3).unwrap();

    let order: Vec<String> = std::iter::from_fn(|| queue.dequeue().unwrap())
        .map(|r| r.id)
        .collect();
    assert_eq!(order, vec![high, mid, low]);
}

#[test]
fn test_equal_priorities_dequeue_in_arrival_order() {
    let queue = InstructionQueue::new(QueueConfig::default());
    let first = queue.enqueue(instruction("s1", "a"), 5, 3).unwrap();
    let second = queue.enqueue(instruction("s1", "b"), 5, 3).unwrap();

    assert_eq!(queue.dequeue().unwrap().unwrap().id, first);
    assert_eq!(queue.dequeue().unwrap().unwrap().id, second);
    assert!(queue.dequeue().unwrap().is_none());
}

#[test]
fn test_full_queue_rejects_enqueue() {
    let config = QueueConfig {
        max_size: 2,
        ..QueueConfig::default()
    };
    let queue = InstructionQueue::new(config);
    queue.enqueue(instruction("s1", "a"), 5, 3).unwrap();
    queue.enqueue(instruction("s1", "b"), 5, 3).unwrap();

    let err = queue.enqueue(instruction("s1", "c"), 5, 3).unwrap_err();
    assert!(matches!(err, OrchestratorError::QueueFull { capacity: 2 }));
}

#[test]
fn test_retry_budget_is_enforced() {
    let queue = InstructionQueue::new(QueueConfig::default());
    let id = queue.enqueue(instruction("s1", "flaky"), 5, 1).unwrap();

    queue.dequeue().unwrap().unwrap();
    queue
        .update_status(&id, InstructionStatus::Failed, None, Some("boom".into()))
        .unwrap();
    let readmitted = queue.retry(&id).unwrap();
    assert_eq!(readmitted.retry_count, 1);
    assert_eq!(readmitted.status, InstructionStatus::Pending);
    assert!(readmitted.error.is_none());

    queue.dequeue().unwrap().unwrap();
    let failed = queue
        .update_status(&id, InstructionStatus::Failed, None, Some("boom again".into()))
        .unwrap();
    assert!(!failed.can_retry());
    assert!(matches!(
        queue.retry(&id),
        Err(OrchestratorError::RetryNotAllowed { .. })
    ));
}

#[test]
fn test_cancel_session_leaves_other_sessions_alone() {
    let queue = InstructionQueue::new(QueueConfig::default());
    queue.enqueue(instruction("s1", "a"), 5, 3).unwrap();
    queue.enqueue(instruction("s1", "b"), 5, 3).unwrap();
    let other = queue.enqueue(instruction("s2", "c"), 5, 3).unwrap();

    let cancelled = queue.cancel_session("s1").unwrap();
    assert_eq!(cancelled.len(), 2);
    assert!(queue
        .session_instructions("s1")
        .iter()
        .all(|r| r.status == InstructionStatus::Failed));
    assert_eq!(queue.dequeue().unwrap().unwrap().id, other);
}

#[test]
fn test_metrics_reflect_completions() {
    let queue = InstructionQueue::new(QueueConfig::default());
    let a = queue.enqueue(instruction("s1", "a"), 5, 3).unwrap();
    let b = queue.enqueue(instruction("s1", "b"), 5, 0).unwrap();
    queue.enqueue(instruction("s1", "c"), 5, 3).unwrap();

    queue.dequeue().unwrap();
    queue
        .update_status(&a, InstructionStatus::Completed, Some(ExecutionResult::success()), None)
        .unwrap();
    queue.dequeue().unwrap();
    queue
        .update_status(&b, InstructionStatus::Failed, None, Some("bad input".into()))
        .unwrap();

    let metrics = queue.metrics();
    assert_eq!(metrics.pending, 1);
    assert_eq!(metrics.completed, 1);
    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.total, 3);
    assert_eq!(metrics.throughput_per_hour, 1);
}

#[test]
fn test_records_survive_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("queue");
    let done;
    let waiting;
    {
        let store = InstructionStore::open(&path).unwrap();
        let queue = InstructionQueue::open(QueueConfig::default(), store).unwrap();
        done = queue.enqueue(instruction("s1", "a"), 5, 3).unwrap();
        waiting = queue.enqueue(instruction("s1", "b"), 1, 3).unwrap();
        queue.dequeue().unwrap();
        queue
            .update_status(&done, InstructionStatus::Completed, Some(ExecutionResult::success()), None)
            .unwrap();
        queue.flush().unwrap();
    }

    let store = InstructionStore::open(&path).unwrap();
    let queue = InstructionQueue::open(QueueConfig::default(), store).unwrap();
    assert_eq!(queue.get(&done).unwrap().status, InstructionStatus::Completed);
    assert_eq!(queue.dequeue().unwrap().unwrap().id, waiting);
}
