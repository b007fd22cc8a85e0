//! Domain identifiers (strongly-typed IDs).
//!
//! IDs are ULIDs, so they sort by creation time. Handy for checking FIFO
//! order within a tier and for lining up log lines.
//!
//! `Id<T>` tells ID kinds apart with a `PhantomData` marker: no runtime
//! cost, and mixing kinds up is a compile error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each ID kind; provides the Display prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Allocate a fresh id from the wall clock and a random tail.
    pub fn generate() -> Self {
        let timestamp_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self::from_ulid(Ulid::from_parts(timestamp_ms, rand::random()))
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskMarker {}

impl IdMarker for TaskMarker {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Identifier of a Task, assigned when the task is created at submission.
pub type TaskId = Id<TaskMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_displays_with_prefix() {
        let id = TaskId::generate();
        assert!(id.to_string().starts_with("task-"));
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let id1 = TaskId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = TaskId::generate();
        assert!(id1 < id2);
    }

    #[test]
    fn from_ulid_keeps_value() {
        let ulid = Ulid::new();
        let id: TaskId = ulid.into();
        assert_eq!(id.as_ulid(), ulid);
        assert_eq!(std::mem::size_of::<TaskId>(), std::mem::size_of::<Ulid>());
    }
}
