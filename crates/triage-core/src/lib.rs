//! triage-core
//!
//! A concurrent priority dispatch engine: per-source rate limiting, four
//! bounded priority tiers with bounded starvation, a deadline-enforcing
//! worker pool, retries with exponential backoff, and a metrics snapshot.
//!
//! # Modules
//! - **domain**: tasks, tiers, outcomes, retry decisions, events
//! - **ports**: classifier and handler traits supplied by the embedding application
//! - **limiter**: sliding-window admission per source
//! - **queue**: tier queues, selection, retry schedule
//! - **retry**: retry policy
//! - **metrics**: counters, histograms, snapshots
//! - **app**: builder, engine, dispatcher, worker pool, janitor
//!
//! The library logs through `tracing` and never installs a subscriber.

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod ports;
pub mod queue;
pub mod retry;

pub use app::{Engine, EngineBuilder, ShutdownReport, SubmissionResult};
pub use config::EngineConfig;
pub use domain::{
    ErrorKind, HandlerError, Outcome, Priority, SourceId, Task, TaskEvent, TaskId, TaskKind,
    TaskStatus,
};
pub use error::{BuildError, ConfigError, QueueFullError};
pub use metrics::{MetricsMonitor, MetricsSnapshot};
pub use ports::{Classification, Classifier, RoutedEvent, StructuralClassifier, TaskHandler};
