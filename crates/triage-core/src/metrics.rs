//! MetricsMonitor: passive counters and latency histograms.
//!
//! Writers are fire-and-forget: they bump atomics and never fail. Every write
//! holds the shared side of `gate`; [`MetricsMonitor::snapshot`] takes the
//! exclusive side while copying, so a snapshot never sees half of an update
//! that touches several counters (e.g. "finished" + "latency").

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::{Priority, PriorityTable, SourceId, TaskStatus};

/// Upper bounds (milliseconds) of the latency buckets; the last bucket is open.
const LATENCY_BOUNDS_MS: [u64; 15] = [
    1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000,
];
const BUCKETS: usize = LATENCY_BOUNDS_MS.len() + 1;

#[derive(Debug)]
struct LatencyHistogram {
    buckets: [AtomicU64; BUCKETS],
    count: AtomicU64,
    sum_us: AtomicU64,
    max_us: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
            max_us: AtomicU64::new(0),
        }
    }
}

impl LatencyHistogram {
    fn record(&self, latency: Duration) {
        let us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        let ms = us / 1_000;
        let bucket = LATENCY_BOUNDS_MS
            .iter()
            .position(|&bound| ms < bound)
            .unwrap_or(BUCKETS - 1);
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
    }

    fn summary(&self) -> LatencySummary {
        let count = self.count.load(Ordering::Relaxed);
        let max_ms = self.max_us.load(Ordering::Relaxed) as f64 / 1_000.0;
        if count == 0 {
            return LatencySummary::default();
        }
        let counts: Vec<u64> = self
            .buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();
        let percentile = |q: f64| -> f64 {
            let rank = ((count as f64) * q).ceil().max(1.0) as u64;
            let mut seen = 0;
            for (i, n) in counts.iter().enumerate() {
                seen += n;
                if seen >= rank {
                    // bucket upper bound, never above the observed max
                    return LATENCY_BOUNDS_MS
                        .get(i)
                        .map(|&bound| (bound as f64).min(max_ms))
                        .unwrap_or(max_ms);
                }
            }
            max_ms
        };
        LatencySummary {
            count,
            mean_ms: self.sum_us.load(Ordering::Relaxed) as f64 / count as f64 / 1_000.0,
            p50_ms: percentile(0.50),
            p95_ms: percentile(0.95),
            p99_ms: percentile(0.99),
            max_ms,
        }
    }
}

#[derive(Debug, Default)]
struct TierCounters {
    enqueued: AtomicU64,
    dispatched: AtomicU64,
    evicted: AtomicU64,
    rejected: AtomicU64,
    depth: AtomicUsize,
    max_depth: AtomicUsize,
    latency: LatencyHistogram,
}

/// Bucketed end-to-end latency (enqueue to terminal status).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TierSnapshot {
    /// Last sampled queue depth.
    pub depth: usize,
    pub max_depth: usize,
    pub enqueued: u64,
    pub dispatched: u64,
    pub evicted: u64,
    pub rejected: u64,
    pub latency: LatencySummary,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub tiers: PriorityTable<TierSnapshot>,
    pub admitted: u64,
    pub rate_limited: u64,
    pub rate_limited_by_source: BTreeMap<String, u64>,
    pub unknown_kind: u64,
    pub shutdown_refused: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub retried: u64,
    pub retry_scheduled: usize,
    pub running: usize,
    pub worker_pool_size: usize,
    pub utilization: f64,
}

impl MetricsSnapshot {
    /// Tasks that reached a terminal status.
    pub fn terminal(&self) -> u64 {
        self.succeeded + self.failed + self.rejected
    }
}

#[derive(Debug, Default)]
pub struct MetricsMonitor {
    gate: RwLock<()>,
    tiers: PriorityTable<TierCounters>,
    admitted: AtomicU64,
    rate_limited: AtomicU64,
    rate_limited_by_source: DashMap<SourceId, u64>,
    unknown_kind: AtomicU64,
    shutdown_refused: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
    retried: AtomicU64,
    retry_scheduled: AtomicUsize,
    running: AtomicUsize,
    worker_pool_size: AtomicUsize,
}

impl MetricsMonitor {
    pub fn new(worker_pool_size: usize) -> Self {
        let monitor = Self::default();
        monitor
            .worker_pool_size
            .store(worker_pool_size, Ordering::Relaxed);
        monitor
    }

    pub fn record_admitted(&self) {
        let _g = self.gate.read();
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self, source: &SourceId) {
        let _g = self.gate.read();
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
        *self
            .rate_limited_by_source
            .entry(source.clone())
            .or_insert(0) += 1;
    }

    /// Per-source counts follow the rate window's lifetime.
    pub fn forget_sources(&self, sources: &[SourceId]) {
        let _g = self.gate.read();
        for source in sources {
            self.rate_limited_by_source.remove(source);
        }
    }

    pub fn record_unknown_kind(&self) {
        let _g = self.gate.read();
        self.unknown_kind.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shutdown_refused(&self) {
        let _g = self.gate.read();
        self.shutdown_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self, priority: Priority) {
        let _g = self.gate.read();
        self.tiers[priority].enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, priority: Priority) {
        let _g = self.gate.read();
        self.tiers[priority].evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self, priority: Priority) {
        let _g = self.gate.read();
        self.tiers[priority]
            .dispatched
            .fetch_add(1, Ordering::Relaxed);
        self.running.fetch_add(1, Ordering::Relaxed);
    }

    /// The handler invocation for a dispatched task has returned or been abandoned.
    pub fn record_released(&self) {
        let _g = self.gate.read();
        self.running.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        let _g = self.gate.read();
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_scheduled(&self) {
        let _g = self.gate.read();
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Terminal status; latency is only recorded for tasks that were dispatched.
    pub fn record_terminal(&self, priority: Priority, status: TaskStatus, latency: Option<Duration>) {
        let _g = self.gate.read();
        let counter = match status {
            TaskStatus::Succeeded => &self.succeeded,
            TaskStatus::Failed => &self.failed,
            TaskStatus::Rejected => {
                self.tiers[priority].rejected.fetch_add(1, Ordering::Relaxed);
                &self.rejected
            }
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = latency {
            self.tiers[priority].latency.record(latency);
        }
    }

    pub fn sample_depths(&self, depths: &PriorityTable<usize>, retry_scheduled: usize) {
        let _g = self.gate.read();
        for (priority, &depth) in depths.iter() {
            let tier = &self.tiers[priority];
            tier.depth.store(depth, Ordering::Relaxed);
            tier.max_depth.fetch_max(depth, Ordering::Relaxed);
        }
        self.retry_scheduled
            .store(retry_scheduled, Ordering::Relaxed);
    }

    pub fn set_worker_pool_size(&self, size: usize) {
        let _g = self.gate.read();
        self.worker_pool_size.store(size, Ordering::Relaxed);
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }

    /// Consistent point-in-time read. No side effects.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let _g = self.gate.write();
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

        let running = self.running.load(Ordering::Relaxed);
        let worker_pool_size = self.worker_pool_size.load(Ordering::Relaxed);
        MetricsSnapshot {
            taken_at: Utc::now(),
            tiers: self.tiers.map(|_, t| TierSnapshot {
                depth: t.depth.load(Ordering::Relaxed),
                max_depth: t.max_depth.load(Ordering::Relaxed),
                enqueued: load(&t.enqueued),
                dispatched: load(&t.dispatched),
                evicted: load(&t.evicted),
                rejected: load(&t.rejected),
                latency: t.latency.summary(),
            }),
            admitted: load(&self.admitted),
            rate_limited: load(&self.rate_limited),
            rate_limited_by_source: self
                .rate_limited_by_source
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
            unknown_kind: load(&self.unknown_kind),
            shutdown_refused: load(&self.shutdown_refused),
            succeeded: load(&self.succeeded),
            failed: load(&self.failed),
            rejected: load(&self.rejected),
            timed_out: load(&self.timed_out),
            retried: load(&self.retried),
            retry_scheduled: self.retry_scheduled.load(Ordering::Relaxed),
            running,
            worker_pool_size,
            utilization: if worker_pool_size == 0 {
                0.0
            } else {
                running as f64 / worker_pool_size as f64
            },
        }
    }
}
