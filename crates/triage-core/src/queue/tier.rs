//! One bounded FIFO per priority tier.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::domain::{Priority, Task};

/// Result of pushing into a tier.
#[derive(Debug)]
pub(crate) enum TierPush {
    Stored,
    /// Stored after evicting the oldest entry of the same tier.
    Evicted(Task),
    /// Not stored; the tier rejects newcomers when full.
    Full(Task),
}

#[derive(Debug)]
pub(crate) struct TierQueue {
    priority: Priority,
    items: Mutex<VecDeque<Task>>,
    capacity: AtomicUsize,
}

impl TierQueue {
    pub(crate) fn new(priority: Priority, capacity: usize) -> Self {
        Self {
            priority,
            items: Mutex::new(VecDeque::new()),
            capacity: AtomicUsize::new(capacity),
        }
    }

    /// Apply the tier's overflow policy and store the task if it fits.
    pub(crate) fn push(&self, task: Task) -> TierPush {
        debug_assert_eq!(task.priority(), self.priority);
        let capacity = self.capacity.load(Ordering::Relaxed);
        let mut items = self.items.lock();

        if items.len() < capacity {
            items.push_back(task);
            return TierPush::Stored;
        }
        if !self.priority.evicts_on_overflow() {
            return TierPush::Full(task);
        }
        match items.pop_front() {
            Some(oldest) => {
                items.push_back(task);
                TierPush::Evicted(oldest)
            }
            None => {
                // capacity of zero is rejected by config validation
                TierPush::Full(task)
            }
        }
    }

    pub(crate) fn pop_front(&self) -> Option<Task> {
        self.items.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Shrinking never evicts what is already queued; it bounds new pushes.
    pub(crate) fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    pub(crate) fn drain(&self) -> Vec<Task> {
        self.items.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SourceId, TaskKind};

    fn task(priority: Priority, n: u32) -> Task {
        Task::new(
            SourceId::new(format!("src-{n}")),
            priority,
            TaskKind::new("k"),
            serde_json::json!({ "n": n }),
        )
    }

    #[test]
    fn low_rejects_newcomer_when_full() {
        let q = TierQueue::new(Priority::Low, 2);
        assert!(matches!(q.push(task(Priority::Low, 1)), TierPush::Stored));
        assert!(matches!(q.push(task(Priority::Low, 2)), TierPush::Stored));
        let TierPush::Full(rejected) = q.push(task(Priority::Low, 3)) else {
            panic!("expected Full");
        };
        assert_eq!(rejected.payload()["n"], 3);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_front().unwrap().payload()["n"], 1);
    }

    #[test]
    fn critical_evicts_oldest_when_full() {
        let q = TierQueue::new(Priority::Critical, 2);
        q.push(task(Priority::Critical, 1));
        q.push(task(Priority::Critical, 2));
        let TierPush::Evicted(oldest) = q.push(task(Priority::Critical, 3)) else {
            panic!("expected Evicted");
        };
        assert_eq!(oldest.payload()["n"], 1);
        let remaining: Vec<_> = q.drain().iter().map(|t| t.payload()["n"].clone()).collect();
        assert_eq!(remaining, vec![serde_json::json!(2), serde_json::json!(3)]);
    }

    #[test]
    fn shrinking_capacity_keeps_existing_items() {
        let q = TierQueue::new(Priority::Normal, 3);
        for n in 0..3 {
            q.push(task(Priority::Normal, n));
        }
        q.set_capacity(1);
        assert_eq!(q.len(), 3);
        assert!(matches!(q.push(task(Priority::Normal, 9)), TierPush::Full(_)));
    }
}
