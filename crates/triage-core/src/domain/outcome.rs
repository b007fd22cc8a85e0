//! Outcome model: what one execution attempt produced.
//!
//! The worker pool builds these; the retry manager reads them. Nothing here
//! knows about queues or slots.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::HandlerError;

/// Classification of an attempt result, for logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
    TimedOut,
    Cancelled,
}

/// Result of running a handler once.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success,

    /// The handler returned an error (or panicked, which is recorded as permanent).
    Failure(HandlerError),

    /// The deadline expired; the slot was reclaimed whether or not the handler stopped.
    TimedOut { elapsed: Duration },

    /// Forced cancellation during shutdown.
    Cancelled,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success => OutcomeKind::Success,
            Outcome::Failure(_) => OutcomeKind::Failure,
            Outcome::TimedOut { .. } => OutcomeKind::TimedOut,
            Outcome::Cancelled => OutcomeKind::Cancelled,
        }
    }

    /// Human-readable error for anything but success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Outcome::Success => None,
            Outcome::Failure(err) => Some(err.to_string()),
            Outcome::TimedOut { elapsed } => Some(format!("deadline exceeded after {elapsed:?}")),
            Outcome::Cancelled => Some("cancelled by shutdown".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_kind_serializes_as_required_names() {
        let s = serde_json::to_string(&OutcomeKind::TimedOut).unwrap();
        assert_eq!(s, "\"TIMED_OUT\"");
    }

    #[test]
    fn only_success_has_no_error() {
        assert_eq!(Outcome::Success.error_message(), None);
        let failed = Outcome::Failure(HandlerError::permanent("nope"));
        assert_eq!(failed.kind(), OutcomeKind::Failure);
        assert!(failed.error_message().unwrap().contains("nope"));
        assert!(Outcome::Cancelled.error_message().unwrap().contains("shutdown"));
    }
}
