use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::TaskKind;
use crate::error::BuildError;
use crate::ports::TaskHandler;

/// Registry of handlers (kind -> handler).
///
/// Built while the engine is assembled (mutable), then shared immutably by
/// the dispatcher. No locks on the hot path.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a task kind. A second registration for the same
    /// kind is an error.
    pub fn register(
        &mut self,
        kind: TaskKind,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), BuildError> {
        if self.handlers.contains_key(&kind) {
            return Err(BuildError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn get(&self, kind: &TaskKind) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(kind)
    }

    pub fn contains(&self, kind: &TaskKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().map(|k| k.to_string()).collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HandlerError;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct OkHandler;

    #[async_trait]
    impl TaskHandler for OkHandler {
        async fn handle(
            &self,
            _payload: Arc<serde_json::Value>,
            _cancel: CancellationToken,
        ) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn registered_handler_is_found_and_runs() {
        let mut reg = HandlerRegistry::new();
        reg.register(TaskKind::new("ok"), Arc::new(OkHandler)).unwrap();

        let handler = reg.get(&TaskKind::new("ok")).unwrap();
        handler
            .handle(Arc::new(serde_json::json!({})), CancellationToken::new())
            .await
            .unwrap();
        assert!(reg.get(&TaskKind::new("missing")).is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = HandlerRegistry::new();
        reg.register(TaskKind::new("ok"), Arc::new(OkHandler)).unwrap();
        let err = reg
            .register(TaskKind::new("ok"), Arc::new(OkHandler))
            .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateHandler(kind) if kind.as_str() == "ok"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn kinds_are_sorted() {
        let mut reg = HandlerRegistry::new();
        reg.register(TaskKind::new("respond"), Arc::new(OkHandler)).unwrap();
        reg.register(TaskKind::new("flag"), Arc::new(OkHandler)).unwrap();
        assert_eq!(reg.kinds(), vec!["flag", "respond"]);
    }
}
