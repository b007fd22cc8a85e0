//! Task: the unit of work owned by the engine between admission and its
//! terminal status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

use super::{Priority, TaskId};

/// Name of the handler a task is routed to (e.g. `moderation.check`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKind(String);

impl TaskKind {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of the producer that submitted an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Task status.
///
/// Transitions:
/// - Queued -> Running -> Succeeded
/// - Queued -> Running -> Queued (retry, same tier, after backoff)
/// - Queued -> Running -> TimedOut -> Queued (at most once) | Failed
/// - Queued -> Running -> Failed
/// - Queued -> Rejected (queue full, evicted, or shutdown)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Rejected,
    TimedOut,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Rejected
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Rejected => "rejected",
            TaskStatus::TimedOut => "timed_out",
        };
        f.write_str(label)
    }
}

/// A unit of work.
///
/// `priority` has no setter: reclassification means submitting a new task.
/// Mutation is limited to the lifecycle methods, which only the engine calls.
#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    source_id: SourceId,
    priority: Priority,
    kind: TaskKind,
    payload: Arc<serde_json::Value>,
    enqueued_at: Instant,
    attempts: u32,
    timeouts: u32,
    status: TaskStatus,
    last_error: Option<String>,
}

impl Task {
    pub fn new(
        source_id: SourceId,
        priority: Priority,
        kind: TaskKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            source_id,
            priority,
            kind,
            payload: Arc::new(payload),
            enqueued_at: Instant::now(),
            attempts: 0,
            timeouts: 0,
            status: TaskStatus::Queued,
            last_error: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    /// Shared handle to the payload; handlers receive it untouched.
    pub fn payload(&self) -> Arc<serde_json::Value> {
        Arc::clone(&self.payload)
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Number of execution attempts started so far (including a running one).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Number of attempts that ended in a timeout.
    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Mark as running (increment attempts).
    pub(crate) fn start_attempt(&mut self) {
        self.status = TaskStatus::Running;
        self.attempts += 1;
    }

    pub(crate) fn mark_timed_out(&mut self) {
        self.status = TaskStatus::TimedOut;
        self.timeouts += 1;
        self.last_error = Some("deadline exceeded".to_string());
    }

    /// Back to Queued for a retry; `enqueued_at` is kept so latency stays end-to-end.
    pub(crate) fn requeue(&mut self, error: Option<String>) {
        self.status = TaskStatus::Queued;
        if error.is_some() {
            self.last_error = error;
        }
    }

    pub(crate) fn finish(&mut self, status: TaskStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        if error.is_some() {
            self.last_error = error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample() -> Task {
        Task::new(
            SourceId::new("user-1"),
            Priority::High,
            TaskKind::new("moderation.check"),
            serde_json::json!({"text": "hi"}),
        )
    }

    #[test]
    fn new_task_is_queued_with_zero_attempts() {
        let task = sample();
        assert_eq!(task.status(), TaskStatus::Queued);
        assert_eq!(task.attempts(), 0);
        assert_eq!(task.priority(), Priority::High);
        assert_eq!(task.payload()["text"], "hi");
    }

    #[test]
    fn attempts_count_each_start() {
        let mut task = sample();
        task.start_attempt();
        task.requeue(Some("boom".into()));
        task.start_attempt();
        assert_eq!(task.attempts(), 2);
        assert_eq!(task.status(), TaskStatus::Running);
        assert_eq!(task.last_error(), Some("boom"));
    }

    #[test]
    fn timeout_is_counted() {
        let mut task = sample();
        task.start_attempt();
        task.mark_timed_out();
        assert_eq!(task.timeouts(), 1);
        assert_eq!(task.status(), TaskStatus::TimedOut);
    }

    #[rstest]
    #[case::queued(TaskStatus::Queued, false)]
    #[case::running(TaskStatus::Running, false)]
    #[case::timed_out(TaskStatus::TimedOut, false)]
    #[case::succeeded(TaskStatus::Succeeded, true)]
    #[case::failed(TaskStatus::Failed, true)]
    #[case::rejected(TaskStatus::Rejected, true)]
    fn terminal_statuses(#[case] status: TaskStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }
}
