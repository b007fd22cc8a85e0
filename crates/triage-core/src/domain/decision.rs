//! Decision model: what happens to a task after an attempt.

use std::time::Duration;

use super::TaskStatus;

/// The next action for a task, as decided by the retry manager.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Re-enqueue into the same tier once `delay` has elapsed.
    Retry { delay: Duration, reason: String },

    /// Stop here with a terminal status.
    Terminal { status: TaskStatus, reason: String },
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}
