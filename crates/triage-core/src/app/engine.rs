//! Engine - the ingress surface and the owner of the background loops.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::HandlerRegistry;
use super::reporter::Reporter;
use super::worker_pool::{Deadlines, WorkerPool};
use crate::config::EngineConfig;
use crate::domain::{Task, TaskEvent, TaskId, TaskStatus};
use crate::error::{ConfigError, QueueFullError};
use crate::limiter::{RateLimitSettings, RateLimiter};
use crate::metrics::{MetricsMonitor, MetricsSnapshot};
use crate::ports::{Classification, Classifier};
use crate::queue::{Enqueued, PriorityQueueSet};
use crate::retry::{RetryManager, RetryPolicy};

/// What `submit` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "task_id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionResult {
    Accepted(TaskId),
    /// Denied by the source's rate window; no task was created.
    RateLimited,
    /// The tier was full and rejects newcomers; the task was recorded REJECTED.
    QueueFull,
    /// No handler is registered for the classified kind; no task was created.
    UnknownKind,
    /// Shutdown has begun.
    ShuttingDown,
}

impl SubmissionResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmissionResult::Accepted(_))
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            SubmissionResult::Accepted(id) => Some(*id),
            _ => None,
        }
    }
}

/// Outcome of [`Engine::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Tasks that reached a terminal status during the grace period.
    pub drained: usize,
    /// RUNNING tasks force-cancelled after the grace period (terminal FAILED).
    pub cancelled_running: usize,
    /// QUEUED or retry-scheduled tasks marked REJECTED.
    pub rejected_queued: usize,
}

/// State shared by the engine, the dispatcher, the janitor and the worker units.
pub(crate) struct Core {
    pub(crate) limiter: RateLimiter,
    pub(crate) queues: PriorityQueueSet,
    pub(crate) pool: WorkerPool,
    pub(crate) retry: RetryManager,
    pub(crate) registry: HandlerRegistry,
    pub(crate) metrics: Arc<MetricsMonitor>,
    pub(crate) reporter: Reporter,
}

impl Core {
    pub(crate) fn new(config: &EngineConfig, registry: HandlerRegistry, event_capacity: usize) -> Self {
        let metrics = Arc::new(MetricsMonitor::new(config.worker_pool_size));
        Self {
            limiter: RateLimiter::new(RateLimitSettings::from_config(config)),
            queues: PriorityQueueSet::new(
                config.queue_capacity_per_tier,
                config.starvation_threshold_k,
            ),
            pool: WorkerPool::from_config(config),
            retry: RetryManager::new(RetryPolicy::from_config(config)),
            registry,
            reporter: Reporter::new(Arc::clone(&metrics), event_capacity),
            metrics,
        }
    }

    /// Push every live-tunable setting into the components.
    pub(crate) fn apply(&self, config: &EngineConfig) {
        self.limiter
            .reconfigure(RateLimitSettings::from_config(config));
        self.queues.set_capacity(config.queue_capacity_per_tier);
        self.queues
            .set_starvation_threshold(config.starvation_threshold_k);
        self.pool.set_deadlines(Deadlines::from_config(config));
        self.pool.resize(config.worker_pool_size);
        self.metrics.set_worker_pool_size(config.worker_pool_size);
        self.retry.set_policy(RetryPolicy::from_config(config));
    }
}

pub(crate) struct Loops {
    pub(crate) stop_dispatch: CancellationToken,
    pub(crate) stop_janitor: CancellationToken,
    pub(crate) dispatcher: JoinHandle<()>,
    pub(crate) janitor: JoinHandle<()>,
}

/// The dispatch engine. Built with [`EngineBuilder`](super::EngineBuilder).
///
/// `submit` is synchronous and never waits on I/O: admission, classification
/// and enqueue are in-memory operations. Everything else runs on the
/// dispatcher and the worker pool.
pub struct Engine<E> {
    core: Arc<Core>,
    classifier: Arc<dyn Classifier<E>>,
    config: watch::Sender<EngineConfig>,
    /// `true` while submissions are accepted. Held shared for the whole of
    /// `submit` so shutdown cannot slip in between the check and the enqueue.
    accepting: RwLock<bool>,
    loops: Mutex<Option<Loops>>,
}

impl<E> Engine<E> {
    pub(crate) fn new(
        core: Arc<Core>,
        classifier: Arc<dyn Classifier<E>>,
        config: watch::Sender<EngineConfig>,
        loops: Loops,
    ) -> Self {
        Self {
            core,
            classifier,
            config,
            accepting: RwLock::new(true),
            loops: Mutex::new(Some(loops)),
        }
    }

    /// The sole ingress call.
    pub fn submit(&self, event: &E) -> SubmissionResult {
        let accepting = self.accepting.read();
        if !*accepting {
            self.core.metrics.record_shutdown_refused();
            return SubmissionResult::ShuttingDown;
        }

        let source_id = self.classifier.source_of(event);
        if !self.core.limiter.admit(&source_id) {
            self.core.metrics.record_rate_limited(&source_id);
            debug!(source_id = %source_id, "rate limited");
            return SubmissionResult::RateLimited;
        }
        self.core.metrics.record_admitted();

        let Classification {
            priority,
            kind,
            payload,
        } = self.classifier.classify(event);
        if !self.core.registry.contains(&kind) {
            self.core.metrics.record_unknown_kind();
            warn!(source_id = %source_id, kind = %kind, "no handler for kind");
            return SubmissionResult::UnknownKind;
        }

        let task = Task::new(source_id, priority, kind, payload);
        let task_id = task.id();
        self.core.reporter.track();

        match self.core.queues.enqueue(task) {
            Ok(Enqueued { evicted }) => {
                self.core.metrics.record_enqueued(priority);
                debug!(task_id = %task_id, priority = %priority, "task queued");
                if let Some(oldest) = evicted {
                    self.core.metrics.record_evicted(priority);
                    self.core.reporter.finish(
                        oldest,
                        TaskStatus::Rejected,
                        Some("evicted by a newer task in a full tier".to_string()),
                    );
                }
                SubmissionResult::Accepted(task_id)
            }
            Err(QueueFullError { task }) => {
                self.core
                    .reporter
                    .finish(task, TaskStatus::Rejected, Some("queue full".to_string()));
                SubmissionResult::QueueFull
            }
        }
    }

    /// Point-in-time metrics; depths are sampled fresh for the snapshot.
    pub fn snapshot_metrics(&self) -> MetricsSnapshot {
        self.core
            .metrics
            .sample_depths(&self.core.queues.depths(), self.core.queues.scheduled_len());
        self.core.metrics.snapshot()
    }

    /// Lifecycle events: timeouts and terminal statuses. Lagging receivers
    /// lose events; the engine never waits on them.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.core.reporter.subscribe()
    }

    pub fn config(&self) -> EngineConfig {
        self.config.borrow().clone()
    }

    /// Follow configuration changes.
    pub fn watch_config(&self) -> watch::Receiver<EngineConfig> {
        self.config.subscribe()
    }

    /// Validate and apply a new configuration to the running engine.
    pub fn reload_config(&self, config: EngineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.core.apply(&config);
        info!(
            worker_pool_size = config.worker_pool_size,
            queue_capacity_per_tier = config.queue_capacity_per_tier,
            starvation_threshold_k = config.starvation_threshold_k,
            "configuration reloaded"
        );
        self.config.send_replace(config);
        Ok(())
    }

    /// Tasks created and not yet terminal.
    pub fn live_tasks(&self) -> usize {
        self.core.reporter.live()
    }

    /// Graceful shutdown.
    ///
    /// 1. stop accepting submissions
    /// 2. keep dispatching until every task is terminal or the grace period ends
    /// 3. stop the dispatcher, cancel whatever is still running
    /// 4. mark everything still queued (or waiting to retry) REJECTED
    ///
    /// A second call returns an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let Some(loops) = self.loops.lock().take() else {
            return ShutdownReport::default();
        };
        *self.accepting.write() = false;

        let grace = self.config.borrow().shutdown_grace();
        let live_at_start = self.core.reporter.live();
        info!(live = live_at_start, grace_ms = grace.as_millis() as u64, "shutdown started, draining");

        let idle = tokio::time::timeout(grace, self.core.reporter.wait_idle())
            .await
            .is_ok();
        let drained = live_at_start.saturating_sub(self.core.reporter.live());
        if !idle {
            warn!(
                remaining = self.core.reporter.live(),
                in_flight = self.core.pool.in_flight(),
                free_slots = self.core.pool.available(),
                "grace period over"
            );
        }

        loops.stop_dispatch.cancel();
        if let Err(err) = loops.dispatcher.await {
            warn!(error = %err, "dispatcher ended abnormally");
        }

        self.core.pool.close();
        self.core.pool.cancel_all();
        self.core.pool.wait().await;
        let cancelled_running = self.core.pool.cancelled();

        let leftover = self.core.queues.drain_all();
        let rejected_queued = leftover.len();
        for task in leftover {
            self.core.reporter.finish(
                task,
                TaskStatus::Rejected,
                Some("rejected at shutdown".to_string()),
            );
        }

        loops.stop_janitor.cancel();
        if let Err(err) = loops.janitor.await {
            warn!(error = %err, "janitor ended abnormally");
        }

        let report = ShutdownReport {
            drained,
            cancelled_running,
            rejected_queued,
        };
        info!(
            drained = report.drained,
            cancelled_running = report.cancelled_running,
            rejected_queued = report.rejected_queued,
            "shutdown complete"
        );
        report
    }
}

impl<E> Drop for Engine<E> {
    /// Dropped without `shutdown`: stop the loops so they release the core.
    fn drop(&mut self) {
        if let Some(loops) = self.loops.get_mut().take() {
            debug!("engine dropped without shutdown, stopping loops");
            loops.stop_dispatch.cancel();
            loops.stop_janitor.cancel();
            self.core.pool.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::app::EngineBuilder;
    use crate::domain::{HandlerError, Priority, SourceId, TaskKind};
    use crate::ports::{RoutedEvent, StructuralClassifier, TaskHandler};
    use async_trait::async_trait;

    struct Ping;

    impl RoutedEvent for Ping {
        fn source_id(&self) -> SourceId {
            SourceId::new("s")
        }

        fn kind(&self) -> TaskKind {
            TaskKind::new("ping")
        }

        fn payload(&self) -> serde_json::Value {
            serde_json::Value::Null
        }

        fn priority_hint(&self) -> Option<Priority> {
            Some(Priority::Normal)
        }
    }

    struct Pong;

    #[async_trait]
    impl TaskHandler for Pong {
        async fn handle(
            &self,
            _payload: Arc<serde_json::Value>,
            _cancel: CancellationToken,
        ) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_engine_stops_its_loops() {
        let engine = EngineBuilder::<Ping>::new()
            .classifier(StructuralClassifier)
            .register("ping", Pong)
            .unwrap()
            .build()
            .unwrap();
        assert!(engine.submit(&Ping).is_accepted());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let core = Arc::downgrade(&engine.core);
        drop(engine);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(core.upgrade().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_after_shutdown_is_quiet() {
        let engine = EngineBuilder::<Ping>::new()
            .classifier(StructuralClassifier)
            .register("ping", Pong)
            .unwrap()
            .build()
            .unwrap();
        engine.shutdown().await;
        let core = Arc::downgrade(&engine.core);
        drop(engine);
        assert!(core.upgrade().is_none());
    }
}
