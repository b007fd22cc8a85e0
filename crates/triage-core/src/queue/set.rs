//! The four tier queues, the retry schedule, and the wake-up signal.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tokio::time::Instant;

use super::selector::Selector;
use super::tier::{TierPush, TierQueue};
use crate::domain::{Priority, PriorityTable, Task};
use crate::error::QueueFullError;

/// Successful enqueue; `evicted` is set when an urgent tier made room.
#[derive(Debug)]
pub struct Enqueued {
    pub evicted: Option<Task>,
}

/// A task waiting out its retry backoff.
///
/// Reverse ordering so `BinaryHeap` acts as a min-heap (earliest first);
/// `seq` keeps equal deadlines in scheduling order.
#[derive(Debug)]
struct ScheduledTask {
    run_at: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Bounded per-tier FIFOs plus weighted selection.
///
/// Each tier has its own lock; the selector lock is only taken by
/// [`dequeue_next`](Self::dequeue_next). No lock is ever held across an await.
pub struct PriorityQueueSet {
    tiers: PriorityTable<TierQueue>,
    selector: Mutex<Selector>,
    scheduled: Mutex<BinaryHeap<ScheduledTask>>,
    next_seq: AtomicU64,
    notify: Notify,
}

impl PriorityQueueSet {
    pub fn new(capacity_per_tier: usize, starvation_threshold: u32) -> Self {
        Self {
            tiers: PriorityTable::from_fn(|p| TierQueue::new(p, capacity_per_tier)),
            selector: Mutex::new(Selector::new(starvation_threshold)),
            scheduled: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Insert into the task's own tier, applying that tier's overflow policy.
    pub fn enqueue(&self, task: Task) -> Result<Enqueued, QueueFullError> {
        let outcome = self.tiers[task.priority()].push(task);
        match outcome {
            TierPush::Stored => {
                self.notify.notify_one();
                Ok(Enqueued { evicted: None })
            }
            TierPush::Evicted(oldest) => {
                self.notify.notify_one();
                Ok(Enqueued {
                    evicted: Some(oldest),
                })
            }
            TierPush::Full(task) => Err(QueueFullError { task }),
        }
    }

    /// Next task by weighted priority, or `None` when every tier is empty.
    pub fn dequeue_next(&self) -> Option<Task> {
        let mut selector = self.selector.lock();
        // A tier can only shrink under us if another consumer pops it; retry
        // selection a bounded number of times in that case.
        for _ in 0..Priority::ALL.len() {
            let ready = self.tiers.map(|_, tier| !tier.is_empty());
            let tier = selector.pick(&ready)?;
            if let Some(task) = self.tiers[tier].pop_front() {
                return Some(task);
            }
        }
        None
    }

    /// Park a task until `run_at`, then [`promote_due`](Self::promote_due) moves it
    /// back into its tier.
    pub fn schedule(&self, task: Task, run_at: Instant) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.scheduled.lock().push(ScheduledTask { run_at, seq, task });
        // wake the dispatcher so it recomputes its sleep deadline
        self.notify.notify_one();
    }

    /// Move due retries back into their tiers.
    ///
    /// Returns tasks that lost their place to the overflow policy on the way
    /// (evicted same-tier entries or the retry itself); the caller reports them.
    pub fn promote_due(&self, now: Instant) -> Vec<Task> {
        let due = {
            let mut scheduled = self.scheduled.lock();
            let mut due = Vec::new();
            while scheduled.peek().is_some_and(|entry| entry.run_at <= now) {
                if let Some(entry) = scheduled.pop() {
                    due.push(entry.task);
                }
            }
            due
        };

        let mut displaced = Vec::new();
        for task in due {
            match self.enqueue(task) {
                Ok(Enqueued { evicted }) => displaced.extend(evicted),
                Err(QueueFullError { task }) => displaced.push(task),
            }
        }
        displaced
    }

    /// Earliest pending retry, if any.
    pub fn next_wake(&self) -> Option<Instant> {
        self.scheduled.lock().peek().map(|entry| entry.run_at)
    }

    /// Resolves after the next enqueue or schedule. A notification sent while
    /// nobody waits is stored, so checking then awaiting does not miss wakeups.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    pub fn depths(&self) -> PriorityTable<usize> {
        self.tiers.map(|_, tier| tier.len())
    }

    pub fn len(&self) -> usize {
        self.tiers.iter().map(|(_, tier)| tier.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(|(_, tier)| tier.is_empty())
    }

    pub fn scheduled_len(&self) -> usize {
        self.scheduled.lock().len()
    }

    pub fn set_capacity(&self, capacity_per_tier: usize) {
        for (_, tier) in self.tiers.iter() {
            tier.set_capacity(capacity_per_tier);
        }
    }

    pub fn set_starvation_threshold(&self, threshold: u32) {
        self.selector.lock().set_threshold(threshold);
    }

    /// Remove everything still queued or waiting to retry.
    pub fn drain_all(&self) -> Vec<Task> {
        let mut drained: Vec<Task> = self
            .scheduled
            .lock()
            .drain()
            .map(|entry| entry.task)
            .collect();
        for (_, tier) in self.tiers.iter() {
            drained.extend(tier.drain());
        }
        drained
    }
}
