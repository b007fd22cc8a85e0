//! App - wiring of the components into a running engine.
//!
//! - **EngineBuilder**: assembly and fail-fast validation
//! - **Engine**: `submit`, metrics, events, reload, shutdown
//! - **Dispatcher**: slot acquisition + selection loop
//! - **WorkerPool**: bounded, deadline-enforcing execution
//! - **Janitor**: idle-window eviction and depth sampling

pub mod builder;
mod dispatcher;
pub mod engine;
mod janitor;
pub mod registry;
mod reporter;
pub mod worker_pool;

pub use self::builder::EngineBuilder;
pub use self::engine::{Engine, ShutdownReport, SubmissionResult};
pub use self::registry::HandlerRegistry;
pub use self::worker_pool::{Deadlines, Slot, WorkerPool};
