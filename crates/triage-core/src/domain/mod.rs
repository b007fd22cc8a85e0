//! Domain model (IDs, tiers, tasks, outcomes, decisions, events).

pub mod decision;
pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod priority;
pub mod task;

pub use decision::RetryDecision;
pub use errors::{ErrorKind, HandlerError};
pub use events::TaskEvent;
pub use ids::{Id, IdMarker, TaskId};
pub use outcome::{Outcome, OutcomeKind};
pub use priority::{Priority, PriorityTable};
pub use task::{SourceId, Task, TaskKind, TaskStatus};
