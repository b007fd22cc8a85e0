//! WorkerPool - bounded concurrency gate plus deadline enforcement.
//!
//! Slots are semaphore permits. Each dispatched task runs as a supervised
//! unit on the pool's `TaskTracker`; the handler itself runs in its own
//! spawned task so that a handler which ignores cancellation can be abandoned
//! once the hard cap elapses, and its slot reclaimed anyway.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::domain::{HandlerError, Outcome, Task};
use crate::ports::TaskHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// Soft deadline: the handler's cancellation token fires.
    pub timeout: Duration,
    /// Extra grace after the soft deadline before the handler is abandoned.
    pub hard_cap: Duration,
}

impl Deadlines {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            timeout: config.task_timeout(),
            hard_cap: config.timeout_hard_cap(),
        }
    }
}

/// One unit of pool capacity. Dropping it releases the slot, unless the pool
/// has shrunk meanwhile, in which case the permit is retired.
#[derive(Debug)]
pub struct Slot {
    permit: Option<OwnedSemaphorePermit>,
    retiring: Arc<AtomicUsize>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let retire = self
            .retiring
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if retire {
            permit.forget();
        }
    }
}

pub struct WorkerPool {
    slots: Arc<Semaphore>,
    capacity: AtomicUsize,
    /// Permits still owed after a shrink; taken out of circulation as slots drop.
    retiring: Arc<AtomicUsize>,
    deadlines: RwLock<Deadlines>,
    root: CancellationToken,
    tracker: TaskTracker,
    cancelled: AtomicUsize,
}

impl WorkerPool {
    pub fn new(capacity: usize, deadlines: Deadlines) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity: AtomicUsize::new(capacity),
            retiring: Arc::new(AtomicUsize::new(0)),
            deadlines: RwLock::new(deadlines),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            cancelled: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.worker_pool_size, Deadlines::from_config(config))
    }

    /// Wait for a free slot. `None` once the pool is closed.
    pub async fn acquire(&self) -> Option<Slot> {
        let permit = Arc::clone(&self.slots).acquire_owned().await.ok()?;
        Some(Slot {
            permit: Some(permit),
            retiring: Arc::clone(&self.retiring),
        })
    }

    /// Run one attempt of `task` under the current deadlines.
    ///
    /// Never propagates handler errors or panics; everything becomes an [`Outcome`].
    pub async fn run(&self, task: &Task, handler: Arc<dyn TaskHandler>) -> Outcome {
        let Deadlines { timeout, hard_cap } = self.deadlines();
        let token = self.root.child_token();
        let payload = task.payload();
        let started = Instant::now();

        let mut handle = tokio::spawn({
            let token = token.clone();
            async move { handler.handle(payload, token).await }
        });

        tokio::select! {
            biased;
            _ = self.root.cancelled() => {
                // forced shutdown: give the handler the hard cap to wind down
                if tokio::time::timeout(hard_cap, &mut handle).await.is_err() {
                    handle.abort();
                }
                self.cancelled.fetch_add(1, Ordering::Relaxed);
                return Outcome::Cancelled;
            }
            joined = &mut handle => return Self::joined(task, joined),
            _ = tokio::time::sleep(timeout) => {
                token.cancel();
                debug!(task_id = %task.id(), "deadline reached, handler cancelled");
            }
        }

        if tokio::time::timeout(hard_cap, &mut handle).await.is_err() {
            warn!(
                task_id = %task.id(),
                hard_cap_ms = hard_cap.as_millis() as u64,
                "handler ignored cancellation, abandoning it"
            );
            handle.abort();
        }
        Outcome::TimedOut {
            elapsed: started.elapsed(),
        }
    }

    fn joined(task: &Task, joined: Result<Result<(), HandlerError>, JoinError>) -> Outcome {
        match joined {
            Ok(Ok(())) => Outcome::Success,
            Ok(Err(err)) => Outcome::Failure(err),
            Err(err) if err.is_panic() => {
                let message = panic_message(err.into_panic());
                error!(task_id = %task.id(), kind = %task.kind(), panic = %message, "handler panicked");
                Outcome::Failure(HandlerError::permanent(format!("handler panicked: {message}")))
            }
            Err(_) => Outcome::Cancelled,
        }
    }

    /// Spawn a supervised unit of work; [`wait`](Self::wait) covers it.
    pub fn spawn<F>(&self, unit: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(unit);
    }

    /// Grow or shrink the pool. Shrinking never interrupts running work:
    /// idle permits are removed now, busy ones as their slots are released.
    pub fn resize(&self, capacity: usize) {
        let previous = self.capacity.swap(capacity, Ordering::AcqRel);
        if capacity > previous {
            let grow = capacity - previous;
            let owed = self
                .retiring
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    Some(n.saturating_sub(grow))
                })
                .unwrap_or(0);
            self.slots.add_permits(grow - owed.min(grow));
        } else if capacity < previous {
            let shrink = previous - capacity;
            let removed = self.slots.forget_permits(shrink);
            self.retiring.fetch_add(shrink - removed, Ordering::AcqRel);
        } else {
            return;
        }
        info!(previous, capacity, "worker pool resized");
    }

    pub fn set_deadlines(&self, deadlines: Deadlines) {
        *self.deadlines.write() = deadlines;
    }

    pub fn deadlines(&self) -> Deadlines {
        *self.deadlines.read()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Supervised units not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Attempts ended by [`cancel_all`](Self::cancel_all).
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Stop handing out slots; waiters in [`acquire`](Self::acquire) get `None`.
    pub fn close(&self) {
        self.slots.close();
        self.tracker.close();
    }

    /// Fire every running handler's cancellation token.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    /// Wait for all supervised units. Only returns after [`close`](Self::close).
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, Priority, SourceId, TaskKind};
    use async_trait::async_trait;

    fn pool(capacity: usize) -> WorkerPool {
        WorkerPool::new(
            capacity,
            Deadlines {
                timeout: Duration::from_secs(30),
                hard_cap: Duration::from_secs(2),
            },
        )
    }

    fn task() -> Task {
        Task::new(
            SourceId::new("s"),
            Priority::Normal,
            TaskKind::new("k"),
            serde_json::json!({}),
        )
    }

    struct Returns(Result<(), HandlerError>);

    #[async_trait]
    impl TaskHandler for Returns {
        async fn handle(
            &self,
            _payload: Arc<serde_json::Value>,
            _cancel: CancellationToken,
        ) -> Result<(), HandlerError> {
            self.0.clone()
        }
    }

    /// Never returns and ignores its token.
    struct Stuck;

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

    /// Returns as soon as it is cancelled.
    struct Cooperative;

    #[async_trait]
    impl TaskHandler for Cooperative {
        async fn handle(
            &self,
            _payload: Arc<serde_json::Value>,
            cancel: CancellationToken,
        ) -> Result<(), HandlerError> {
            cancel.cancelled().await;
            Err(HandlerError::transient("cancelled"))
        }
    }

    struct Panics;

    #[async_trait]
    impl TaskHandler for Panics {
        async fn handle(
            &self,
            _payload: Arc<serde_json::Value>,
            _cancel: CancellationToken,
        ) -> Result<(), HandlerError> {
            panic!("kaboom");
        }
    }

    #[tokio::test]
    async fn success_and_failure_pass_through() {
        let pool = pool(1);
        assert_eq!(
            pool.run(&task(), Arc::new(Returns(Ok(())))).await,
            Outcome::Success
        );
        let outcome = pool
            .run(&task(), Arc::new(Returns(Err(HandlerError::transient("later")))))
            .await;
        assert!(matches!(outcome, Outcome::Failure(e) if e.kind() == ErrorKind::Transient));
    }

    #[tokio::test]
    async fn panic_becomes_permanent_failure() {
        let outcome = pool(1).run(&task(), Arc::new(Panics)).await;
        let Outcome::Failure(err) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(!err.is_transient());
        assert!(err.message().contains("kaboom"));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_handler_is_abandoned_at_hard_cap() {
        let pool = pool(1);
        let start = Instant::now();
        let outcome = pool.run(&task(), Arc::new(Stuck)).await;

        assert!(matches!(outcome, Outcome::TimedOut { .. }));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(32), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(33), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cooperative_handler_times_out_at_soft_deadline() {
        let pool = pool(1);
        let start = Instant::now();
        let outcome = pool.run(&task(), Arc::new(Cooperative)).await;

        assert!(matches!(outcome, Outcome::TimedOut { .. }));
        assert!(start.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_reports_cancelled() {
        let pool = Arc::new(pool(1));
        let run = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.run(&task(), Arc::new(Cooperative)).await })
        };
        tokio::task::yield_now().await;
        pool.cancel_all();

        assert_eq!(run.await.unwrap(), Outcome::Cancelled);
        assert_eq!(pool.cancelled(), 1);
    }

    #[tokio::test]
    async fn slots_bound_concurrency() {
        let pool = pool(2);
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        drop(a);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn shrinking_retires_busy_slots_on_release() {
        let pool = pool(2);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();

        pool.resize(1);
        drop(a);
        assert_eq!(pool.available(), 0);
        drop(b);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.capacity(), 1);
    }

    #[tokio::test]
    async fn growing_cancels_pending_retirements_first() {
        let pool = pool(2);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();

        pool.resize(1);
        pool.resize(3);
        // one permit was owed; growing by two pays it back and adds one
        assert_eq!(pool.available(), 1);
        drop(a);
        drop(b);
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test]
    async fn close_wakes_acquirers_with_none() {
        let pool = pool(1);
        let _held = pool.acquire().await.unwrap();
        pool.close();
        assert!(pool.acquire().await.is_none());
    }
}
