use thiserror::Error;

use crate::domain::{Task, TaskKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Raised while assembling an engine; all of these are startup mistakes.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no classifier configured")]
    MissingClassifier,

    #[error("duplicate handler for task kind={0}")]
    DuplicateHandler(TaskKind),

    #[error("missing handlers for task kinds: {0:?}")]
    MissingHandlers(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// The target tier was full and its overflow policy rejects newcomers.
/// The task is handed back so the caller can record its terminal status.
#[derive(Debug, Error)]
#[error("queue for tier {} is full", .task.priority())]
pub struct QueueFullError {
    pub task: Task,
}
