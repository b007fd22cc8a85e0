//! Ports - the engine's seams to external collaborators.
//!
//! Classification and the actual work are supplied from outside; the engine
//! only schedules.

pub mod classifier;
pub mod handler;

pub use self::classifier::{Classification, Classifier, RoutedEvent, StructuralClassifier};
pub use self::handler::TaskHandler;
