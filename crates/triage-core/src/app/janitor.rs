//! Janitor - periodic housekeeping.
//!
//! - evicts idle rate windows (and their per-source metrics)
//! - samples per-tier queue depths
//! - follows `maintenance_interval_seconds` across reloads

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::engine::Core;
use crate::config::EngineConfig;

pub(crate) struct Janitor {
    core: Arc<Core>,
    config: watch::Receiver<EngineConfig>,
    stop: CancellationToken,
}

impl Janitor {
    pub(crate) fn new(
        core: Arc<Core>,
        config: watch::Receiver<EngineConfig>,
        stop: CancellationToken,
    ) -> Self {
        Self { core, config, stop }
    }

    pub(crate) async fn run(mut self) {
        let mut period = self.config.borrow_and_update().maintenance_interval();
        let mut ticker = maintenance_ticker(period);
        info!(interval_ms = period.as_millis() as u64, "janitor started");

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                changed = self.config.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = self.config.borrow_and_update().maintenance_interval();
                    if next != period {
                        period = next;
                        ticker = maintenance_ticker(period);
                        debug!(interval_ms = period.as_millis() as u64, "janitor interval changed");
                    }
                }
                _ = ticker.tick() => self.sweep(Instant::now()),
            }
        }
        debug!("janitor stopped");
    }

    pub(crate) fn sweep(&self, now: Instant) {
        let evicted = self.core.limiter.evict_idle(now);
        if !evicted.is_empty() {
            self.core.metrics.forget_sources(&evicted);
        }
        self.core
            .metrics
            .sample_depths(&self.core.queues.depths(), self.core.queues.scheduled_len());
    }
}

fn maintenance_ticker(period: Duration) -> Interval {
    // first tick one period from now, not immediately
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
