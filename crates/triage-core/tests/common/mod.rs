#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use triage_core::{
    Engine, EngineBuilder, EngineConfig, HandlerError, Priority, RoutedEvent, SourceId,
    StructuralClassifier, TaskEvent, TaskHandler, TaskId, TaskKind,
};

/// Event carrying its own routing fields.
#[derive(Debug, Clone)]
pub struct Event {
    pub source: String,
    pub priority: Option<Priority>,
    pub kind: String,
    pub label: String,
}

impl RoutedEvent for Event {
    fn source_id(&self) -> SourceId {
        SourceId::new(self.source.clone())
    }

    fn kind(&self) -> TaskKind {
        TaskKind::new(self.kind.clone())
    }

    fn payload(&self) -> serde_json::Value {
        serde_json::json!({ "label": self.label })
    }

    fn priority_hint(&self) -> Option<Priority> {
        self.priority
    }
}

pub fn event(source: &str, priority: Priority, kind: &str, label: &str) -> Event {
    Event {
        source: source.to_string(),
        priority: Some(priority),
        kind: kind.to_string(),
        label: label.to_string(),
    }
}

pub fn label_of(payload: &serde_json::Value) -> String {
    payload["label"].as_str().unwrap_or_default().to_string()
}

pub fn engine(config: EngineConfig, handlers: Vec<(&str, Arc<dyn TaskHandler>)>) -> Engine<Event> {
    let mut builder = EngineBuilder::<Event>::new()
        .config(config)
        .classifier(StructuralClassifier);
    for (kind, handler) in handlers {
        builder = builder.register_arc(kind, handler).unwrap();
    }
    builder.build().unwrap()
}

/// Config with rate limiting loose enough not to interfere.
pub fn roomy_config() -> EngineConfig {
    EngineConfig {
        rate_limit_max_events: 10_000,
        ..EngineConfig::default()
    }
}

/// Next terminal event for `id`, skipping everything else.
pub async fn terminal_event(rx: &mut broadcast::Receiver<TaskEvent>, id: TaskId) -> TaskEvent {
    loop {
        let event = rx.recv().await.unwrap();
        if event.task_id == id && event.status.is_terminal() {
            return event;
        }
    }
}

/// Collect `n` terminal events.
pub async fn terminal_events(rx: &mut broadcast::Receiver<TaskEvent>, n: usize) -> Vec<TaskEvent> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let event = rx.recv().await.unwrap();
        if event.status.is_terminal() {
            out.push(event);
        }
    }
    out
}

/// Succeeds immediately, recording payload labels in start order.
#[derive(Default)]
pub struct Recorder {
    pub order: Mutex<Vec<String>>,
}

#[async_trait]
impl TaskHandler for Recorder {
    async fn handle(
        &self,
        payload: Arc<serde_json::Value>,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        self.order.lock().push(label_of(&payload));
        Ok(())
    }
}

/// Blocks until released (or cancelled); signals when it starts.
pub struct Gate {
    pub started: Notify,
    pub release: CancellationToken,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            started: Notify::new(),
            release: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl TaskHandler for Gate {
    async fn handle(
        &self,
        _payload: Arc<serde_json::Value>,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        self.started.notify_one();
        tokio::select! {
            _ = self.release.cancelled() => Ok(()),
            _ = cancel.cancelled() => Err(HandlerError::transient("cancelled")),
        }
    }
}

/// Fails transiently on every call; remembers when it was called.
#[derive(Default)]
pub struct AlwaysTransient {
    pub calls: Mutex<Vec<Instant>>,
}

#[async_trait]
impl TaskHandler for AlwaysTransient {
    async fn handle(
        &self,
        _payload: Arc<serde_json::Value>,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        self.calls.lock().push(Instant::now());
        Err(HandlerError::transient("upstream unavailable"))
    }
}

/// Never returns and ignores cancellation.
pub struct Stuck;

#[async_trait]
impl TaskHandler for Stuck {
    async fn handle(
        &self,
        _payload: Arc<serde_json::Value>,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Holds for `hold`, tracking how many invocations overlap.
pub struct Gauge {
    pub hold: Duration,
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Gauge {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for Gauge {
    async fn handle(
        &self,
        _payload: Arc<serde_json::Value>,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
