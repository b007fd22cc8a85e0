//! EngineBuilder - wiring and startup validation.
//!
//! Everything that can be wrong with an engine is caught in `build()`:
//! invalid config, no classifier, a kind registered twice, or an expected
//! kind with no handler.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::dispatcher::Dispatcher;
use super::engine::{Core, Engine, Loops};
use super::janitor::Janitor;
use super::registry::HandlerRegistry;
use crate::config::EngineConfig;
use crate::domain::TaskKind;
use crate::error::BuildError;
use crate::ports::{Classifier, TaskHandler};

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Builds an [`Engine`].
///
/// ```ignore
/// let engine = EngineBuilder::new()
///     .config(config)
///     .classifier(StructuralClassifier)
///     .register("moderation.check", ModerationHandler)?
///     .expect_kinds(&["moderation.check"])
///     .build()?;
/// ```
pub struct EngineBuilder<E> {
    config: EngineConfig,
    classifier: Option<Arc<dyn Classifier<E>>>,
    registry: HandlerRegistry,
    expected_kinds: Option<Vec<String>>,
    event_capacity: usize,
}

impl<E: 'static> EngineBuilder<E> {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            classifier: None,
            registry: HandlerRegistry::new(),
            expected_kinds: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn classifier<C>(mut self, classifier: C) -> Self
    where
        C: Classifier<E> + 'static,
    {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    pub fn register<H>(mut self, kind: impl Into<String>, handler: H) -> Result<Self, BuildError>
    where
        H: TaskHandler + 'static,
    {
        self.registry
            .register(TaskKind::new(kind), Arc::new(handler))?;
        Ok(self)
    }

    pub fn register_arc(
        mut self,
        kind: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self, BuildError> {
        self.registry.register(TaskKind::new(kind), handler)?;
        Ok(self)
    }

    /// Kinds that must have a handler; `build()` fails otherwise.
    pub fn expect_kinds(mut self, kinds: &[&str]) -> Self {
        self.expected_kinds = Some(kinds.iter().map(|k| k.to_string()).collect());
        self
    }

    /// Buffer size of the lifecycle event channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate, then start the dispatcher and the janitor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Engine<E>, BuildError> {
        self.config.validate()?;
        let classifier = self.classifier.ok_or(BuildError::MissingClassifier)?;

        if let Some(expected) = &self.expected_kinds {
            let missing: Vec<String> = expected
                .iter()
                .filter(|kind| !self.registry.contains(&TaskKind::new(kind.as_str())))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingHandlers(missing));
            }
        }

        info!(
            worker_pool_size = self.config.worker_pool_size,
            queue_capacity_per_tier = self.config.queue_capacity_per_tier,
            kinds = ?self.registry.kinds(),
            "engine starting"
        );

        let core = Arc::new(Core::new(&self.config, self.registry, self.event_capacity));
        let (config_tx, config_rx) = watch::channel(self.config);

        let stop_dispatch = CancellationToken::new();
        let stop_janitor = CancellationToken::new();
        let dispatcher = tokio::spawn(
            Dispatcher::new(Arc::clone(&core), stop_dispatch.clone()).run(),
        );
        let janitor = tokio::spawn(
            Janitor::new(Arc::clone(&core), config_rx, stop_janitor.clone()).run(),
        );

        Ok(Engine::new(
            core,
            classifier,
            config_tx,
            Loops {
                stop_dispatch,
                stop_janitor,
                dispatcher,
                janitor,
            },
        ))
    }
}

impl<E: 'static> Default for EngineBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HandlerError;
    use crate::ports::{RoutedEvent, StructuralClassifier};
    use async_trait::async_trait;

    struct Event;

    impl RoutedEvent for Event {
        fn source_id(&self) -> crate::domain::SourceId {
            crate::domain::SourceId::new("s")
        }

        fn kind(&self) -> TaskKind {
            TaskKind::new("ok")
        }

        fn payload(&self) -> serde_json::Value {
            serde_json::Value::Null
        }
    }

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
    async fn build_success() {
        let engine = EngineBuilder::<Event>::new()
            .classifier(StructuralClassifier)
            .register("ok", OkHandler)
            .unwrap()
            .expect_kinds(&["ok"])
            .build();
        assert!(engine.is_ok());
    }

    #[tokio::test]
    async fn build_missing_handlers() {
        let result = EngineBuilder::<Event>::new()
            .classifier(StructuralClassifier)
            .register("ok", OkHandler)
            .unwrap()
            .expect_kinds(&["ok", "respond"])
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingHandlers(missing)) if missing == vec!["respond".to_string()]
        ));
    }

    #[tokio::test]
    async fn build_requires_classifier() {
        let result = EngineBuilder::<Event>::new()
            .register("ok", OkHandler)
            .unwrap()
            .build();
        assert!(matches!(result, Err(BuildError::MissingClassifier)));
    }

    #[tokio::test]
    async fn build_rejects_invalid_config() {
        let config = EngineConfig {
            worker_pool_size: 0,
            ..EngineConfig::default()
        };
        let result = EngineBuilder::<Event>::new()
            .config(config)
            .classifier(StructuralClassifier)
            .build();
        assert!(matches!(result, Err(BuildError::Config(_))));
    }

    #[test]
    fn duplicate_kind_fails_at_registration() {
        let result = EngineBuilder::<Event>::new()
            .register("ok", OkHandler)
            .unwrap()
            .register("ok", OkHandler);
        assert!(matches!(result, Err(BuildError::DuplicateHandler(_))));
    }
}
