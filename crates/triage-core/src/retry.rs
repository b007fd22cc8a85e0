//! Retry policy and the manager that applies it to attempt outcomes.

use std::time::Duration;

use parking_lot::RwLock;

use crate::config::EngineConfig;
use crate::domain::{Outcome, RetryDecision, Task, TaskStatus};

/// Timed-out tasks get at most this many extra attempts.
const MAX_TIMEOUT_RETRIES: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_retry_attempts,
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
        }
    }

    /// Backoff before the next attempt: `base * 2^attempts`, capped at `max_delay`.
    ///
    /// With base=1s, cap=60s:
    /// - after attempt 1: 2s
    /// - after attempt 2: 4s
    /// - after attempt 6: 60s (capped)
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Decides retry vs. terminal for each finished attempt.
///
/// The decision itself is a pure function of the task and the outcome; the
/// caller applies it (re-enqueue after `delay`, or report the terminal status).
/// `attempts` is incremented when an attempt starts, so it already counts the
/// attempt being judged.
#[derive(Debug, Default)]
pub struct RetryManager {
    policy: RwLock<RetryPolicy>,
}

impl RetryManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
        }
    }

    pub fn set_policy(&self, policy: RetryPolicy) {
        *self.policy.write() = policy;
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy.read().clone()
    }

    pub fn on_outcome(&self, task: &Task, outcome: &Outcome) -> RetryDecision {
        let policy = self.policy.read();
        let attempts = task.attempts();

        match outcome {
            Outcome::Success => RetryDecision::Terminal {
                status: TaskStatus::Succeeded,
                reason: "handler succeeded".to_string(),
            },
            Outcome::Cancelled => RetryDecision::Terminal {
                status: TaskStatus::Failed,
                reason: "cancelled by shutdown".to_string(),
            },
            Outcome::Failure(err) if !err.is_transient() => RetryDecision::Terminal {
                status: TaskStatus::Failed,
                reason: format!("permanent failure: {}", err.message()),
            },
            Outcome::Failure(_) | Outcome::TimedOut { .. } if attempts >= policy.max_attempts => {
                RetryDecision::Terminal {
                    status: TaskStatus::Failed,
                    reason: format!("max attempts reached: {attempts}/{}", policy.max_attempts),
                }
            }
            // `timeouts` already includes the attempt being judged.
            Outcome::TimedOut { .. } if task.timeouts() > MAX_TIMEOUT_RETRIES => {
                RetryDecision::Terminal {
                    status: TaskStatus::Failed,
                    reason: format!("timed out {} times", task.timeouts()),
                }
            }
            Outcome::Failure(_) | Outcome::TimedOut { .. } => {
                let delay = policy.next_delay(attempts);
                RetryDecision::Retry {
                    delay,
                    reason: format!(
                        "retry attempt {}/{} after {:?}",
                        attempts + 1,
                        policy.max_attempts,
                        delay
                    ),
                }
            }
        }
    }
}
