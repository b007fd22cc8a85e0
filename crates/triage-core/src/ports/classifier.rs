//! Classifier port - turns an inbound event into routing facts.
//!
//! The engine treats the classifier's answer as ground truth. It calls
//! [`Classifier::source_of`] first (rate limiting is priority-agnostic and runs
//! before classification), then [`Classifier::classify`] for admitted events.

use crate::domain::{Priority, SourceId, TaskKind};

/// What the engine needs to know about an admitted event.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub priority: Priority,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
}

pub trait Classifier<E>: Send + Sync {
    /// Cheap structural lookup of the producer; must not inspect content.
    fn source_of(&self, event: &E) -> SourceId;

    fn classify(&self, event: &E) -> Classification;
}

/// Events that already carry their routing fields.
pub trait RoutedEvent {
    fn source_id(&self) -> SourceId;
    fn kind(&self) -> TaskKind;
    fn payload(&self) -> serde_json::Value;

    /// Upstream priority hint, if any.
    fn priority_hint(&self) -> Option<Priority> {
        None
    }
}

/// Minimal classifier: trusts the event's own hint and falls back to NORMAL.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralClassifier;

impl<E: RoutedEvent> Classifier<E> for StructuralClassifier {
    fn source_of(&self, event: &E) -> SourceId {
        event.source_id()
    }

    fn classify(&self, event: &E) -> Classification {
        Classification {
            priority: event.priority_hint().unwrap_or(Priority::Normal),
            kind: event.kind(),
            payload: event.payload(),
        }
    }
}
