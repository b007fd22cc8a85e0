//! Task lifecycle events published to subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use super::{Priority, SourceId, Task, TaskId, TaskKind, TaskStatus};

/// Emitted when a task leaves RUNNING with a timeout and whenever it reaches
/// a terminal status. Exactly one event per task carries a terminal status.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub source_id: SourceId,
    pub priority: Priority,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub attempts: u32,
    /// Time since the task was first enqueued.
    pub latency: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl TaskEvent {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id(),
            source_id: task.source_id().clone(),
            priority: task.priority(),
            kind: task.kind().clone(),
            status: task.status(),
            attempts: task.attempts(),
            latency: task.enqueued_at().elapsed(),
            error: task.last_error().map(str::to_string),
            at: Utc::now(),
        }
    }
}
