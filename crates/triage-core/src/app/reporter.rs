//! Terminal bookkeeping: metrics, lifecycle events, and the live-task count.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, broadcast};
use tracing::{debug, error, warn};

use crate::domain::{Task, TaskEvent, TaskStatus};
use crate::metrics::MetricsMonitor;

/// Every task that enters the engine is tracked here until it is finished.
///
/// `finish` takes the task by value, so a task can be reported terminal once.
pub(crate) struct Reporter {
    metrics: Arc<MetricsMonitor>,
    events: broadcast::Sender<TaskEvent>,
    live: AtomicUsize,
    idle: Notify,
}

impl Reporter {
    pub(crate) fn new(metrics: Arc<MetricsMonitor>, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            metrics,
            events,
            live: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// A task was created; must be called before it becomes visible to the dispatcher.
    pub(crate) fn track(&self) {
        self.live.fetch_add(1, Ordering::AcqRel);
    }

    /// Tasks created but not yet terminal.
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn finish(&self, mut task: Task, status: TaskStatus, error: Option<String>) {
        task.finish(status, error);

        // queued-then-rejected tasks never ran; they stay out of the latency histogram
        let latency = (task.attempts() > 0).then(|| task.enqueued_at().elapsed());
        self.metrics
            .record_terminal(task.priority(), status, latency);

        match status {
            TaskStatus::Succeeded => debug!(
                task_id = %task.id(),
                priority = %task.priority(),
                attempts = task.attempts(),
                "task succeeded"
            ),
            TaskStatus::Rejected => warn!(
                task_id = %task.id(),
                priority = %task.priority(),
                source_id = %task.source_id(),
                reason = task.last_error().unwrap_or_default(),
                "task rejected"
            ),
            _ => error!(
                task_id = %task.id(),
                priority = %task.priority(),
                kind = %task.kind(),
                attempts = task.attempts(),
                error = task.last_error().unwrap_or_default(),
                "task failed"
            ),
        }

        // no subscribers is fine
        let _ = self.events.send(TaskEvent::from_task(&task));

        if self.live.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// RUNNING -> TIMED_OUT; the retry decision follows separately.
    pub(crate) fn timed_out(&self, task: &Task, elapsed: Duration) {
        self.metrics.record_timed_out();
        warn!(
            task_id = %task.id(),
            priority = %task.priority(),
            kind = %task.kind(),
            attempt = task.attempts(),
            elapsed_ms = elapsed.as_millis() as u64,
            "task timed out"
        );
        let _ = self.events.send(TaskEvent::from_task(task));
    }

    /// Resolves once no task is live.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.live() == 0 {
                return;
            }
            notified.await;
        }
    }
}
