//! Dispatcher loop: slot acquisition + selection, nothing else.
//!
//! 1. acquire a worker slot (suspends while the pool is saturated)
//! 2. promote due retries, then `dequeue_next` (suspends while every tier is empty)
//! 3. mark RUNNING and hand the task to a supervised unit on the pool
//!
//! Handler work, retry decisions and terminal reporting all happen inside the
//! unit, after the slot has been released.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::Core;
use super::worker_pool::Slot;
use crate::domain::{Outcome, Priority, RetryDecision, Task, TaskStatus};

pub(crate) struct Dispatcher {
    core: Arc<Core>,
    stop: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(core: Arc<Core>, stop: CancellationToken) -> Self {
        Self { core, stop }
    }

    pub(crate) async fn run(self) {
        info!("dispatcher started");
        loop {
            let slot = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                slot = self.core.pool.acquire() => match slot {
                    Some(slot) => slot,
                    None => break,
                },
            };
            let task = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                task = self.next_task() => task,
            };
            self.launch(slot, task);
        }
        info!("dispatcher stopped");
    }

    /// Next task to run; waits for an enqueue or the earliest retry deadline.
    async fn next_task(&self) -> Task {
        let queues = &self.core.queues;
        loop {
            // register before checking so an enqueue in between is not missed
            let notified = queues.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            for task in queues.promote_due(Instant::now()) {
                self.displaced(task);
            }
            if let Some(task) = queues.dequeue_next() {
                return task;
            }

            match queues.next_wake() {
                Some(wake_at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(wake_at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// A retry could not re-enter its full tier (or pushed out the oldest entry).
    fn displaced(&self, task: Task) {
        let priority = task.priority();
        if priority.evicts_on_overflow() {
            self.core.metrics.record_evicted(priority);
        }
        self.core.reporter.finish(
            task,
            TaskStatus::Rejected,
            Some(displaced_reason(priority).to_string()),
        );
    }

    fn launch(&self, slot: Slot, mut task: Task) {
        // the limit may have been lowered while this retry was scheduled
        let max_attempts = self.core.retry.policy().max_attempts;
        if task.attempts() >= max_attempts {
            drop(slot);
            let error = task.last_error().map_or_else(
                || format!("max attempts reached: {}/{max_attempts}", task.attempts()),
                |last| format!("max attempts reached: {}/{max_attempts}: {last}", task.attempts()),
            );
            warn!(task_id = %task.id(), attempts = task.attempts(), max_attempts, "retry dropped, attempt limit lowered");
            self.core
                .reporter
                .finish(task, TaskStatus::Failed, Some(error));
            return;
        }

        task.start_attempt();
        self.core.metrics.record_dispatched(task.priority());
        debug!(
            task_id = %task.id(),
            priority = %task.priority(),
            kind = %task.kind(),
            attempt = task.attempts(),
            "task dispatched"
        );

        let Some(handler) = self.core.registry.get(task.kind()).cloned() else {
            // submit refuses unknown kinds, so this only guards the invariant
            drop(slot);
            self.core.metrics.record_released();
            let error = format!("no handler for kind={}", task.kind());
            self.core
                .reporter
                .finish(task, TaskStatus::Failed, Some(error));
            return;
        };

        let core = Arc::clone(&self.core);
        self.core.pool.spawn(async move {
            let outcome = core.pool.run(&task, handler).await;
            drop(slot);
            core.metrics.record_released();
            settle(&core, task, outcome);
        });
    }
}

fn displaced_reason(priority: Priority) -> &'static str {
    if priority.evicts_on_overflow() {
        "evicted by a newer task in a full tier"
    } else {
        "queue full on retry"
    }
}

/// Apply the retry decision for a finished attempt.
pub(crate) fn settle(core: &Core, mut task: Task, outcome: Outcome) {
    if let Outcome::TimedOut { elapsed } = &outcome {
        task.mark_timed_out();
        core.reporter.timed_out(&task, *elapsed);
    }

    match core.retry.on_outcome(&task, &outcome) {
        RetryDecision::Retry { delay, reason } => {
            debug!(
                task_id = %task.id(),
                priority = %task.priority(),
                outcome = ?outcome.kind(),
                delay_ms = delay.as_millis() as u64,
                %reason,
                "retry scheduled"
            );
            task.requeue(outcome.error_message());
            core.metrics.record_retry_scheduled();
            core.queues.schedule(task, Instant::now() + delay);
        }
        RetryDecision::Terminal { status, reason } => {
            if status != TaskStatus::Succeeded {
                warn!(task_id = %task.id(), outcome = ?outcome.kind(), %reason, "no further attempts");
            }
            core.reporter
                .finish(task, status, outcome.error_message());
        }
    }
}
