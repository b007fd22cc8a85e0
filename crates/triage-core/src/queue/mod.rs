//! Queue module: bounded tiers, weighted selection, retry schedule.

mod selector;
mod set;
mod tier;

pub use set::{Enqueued, PriorityQueueSet};
