//! Per-source sliding-window admission control.
//!
//! One [`RateWindow`] per source, created on first sight and evicted after a
//! period of inactivity. The map is sharded (`DashMap`) and each window has
//! its own mutex, so admissions for different sources never contend on a
//! shared lock.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use crate::config::EngineConfig;
use crate::domain::SourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub window: Duration,
    pub max_events: usize,
    pub idle_ttl: Duration,
}

impl RateLimitSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            window: config.rate_limit_window(),
            max_events: config.rate_limit_max_events,
            idle_ttl: config.rate_window_idle_ttl(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Admissions of one source inside the trailing window.
#[derive(Debug)]
struct RateWindow {
    admissions: VecDeque<Instant>,
    last_seen: Instant,
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self {
            admissions: VecDeque::new(),
            last_seen: now,
        }
    }

    fn try_admit(&mut self, now: Instant, settings: &RateLimitSettings) -> bool {
        // Timestamps are pushed in order, so everything stale sits at the front.
        while let Some(&oldest) = self.admissions.front() {
            if now.saturating_duration_since(oldest) < settings.window {
                break;
            }
            self.admissions.pop_front();
        }
        self.last_seen = now;

        if self.admissions.len() < settings.max_events {
            self.admissions.push_back(now);
            true
        } else {
            false
        }
    }

    /// Idle past the TTL and holding no admission that still counts.
    fn is_idle(&self, now: Instant, settings: &RateLimitSettings) -> bool {
        let counting = self
            .admissions
            .back()
            .is_some_and(|&newest| now.saturating_duration_since(newest) < settings.window);
        !counting && now.saturating_duration_since(self.last_seen) >= settings.idle_ttl
    }
}

pub struct RateLimiter {
    windows: DashMap<SourceId, Mutex<RateWindow>>,
    settings: RwLock<RateLimitSettings>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            windows: DashMap::new(),
            settings: RwLock::new(settings),
        }
    }

    /// Accept or deny one event from `source`. Never suspends.
    pub fn admit(&self, source: &SourceId) -> bool {
        self.admit_at(source, Instant::now())
    }

    pub fn admit_at(&self, source: &SourceId, now: Instant) -> bool {
        let settings = *self.settings.read();

        // Fast path holds only a shard read guard, which also keeps eviction
        // (shard write) from removing the window underneath us.
        if let Some(window) = self.windows.get(source) {
            return window.lock().try_admit(now, &settings);
        }

        let window = self
            .windows
            .entry(source.clone())
            .or_insert_with(|| Mutex::new(RateWindow::new(now)));
        let admitted = window.lock().try_admit(now, &settings);
        admitted
    }

    /// Drop windows idle for longer than the TTL; returns the evicted sources.
    pub fn evict_idle(&self, now: Instant) -> Vec<SourceId> {
        let settings = *self.settings.read();
        let mut evicted = Vec::new();
        self.windows.retain(|source, window| {
            let keep = !window.lock().is_idle(now, &settings);
            if !keep {
                evicted.push(source.clone());
            }
            keep
        });
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted idle rate windows");
        }
        evicted
    }

    pub fn reconfigure(&self, settings: RateLimitSettings) {
        *self.settings.write() = settings;
    }

    pub fn settings(&self) -> RateLimitSettings {
        *self.settings.read()
    }

    pub fn tracked_sources(&self) -> usize {
        self.windows.len()
    }
}
