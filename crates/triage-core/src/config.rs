//! Engine configuration.
//!
//! Every field has a default, so a partial JSON document is a valid config.
//! Most fields can be changed on a running engine through
//! [`Engine::reload_config`](crate::app::Engine::reload_config).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of tasks running at once, across all tiers.
    pub worker_pool_size: usize,
    pub queue_capacity_per_tier: usize,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_max_events: usize,
    /// Rate windows with no activity for this long are evicted.
    pub rate_window_idle_ttl_seconds: u64,
    /// Soft deadline: the handler's cancellation token fires here.
    pub task_timeout_seconds: u64,
    /// Extra time after the soft deadline before the slot is reclaimed regardless.
    pub timeout_hard_cap_seconds: u64,
    pub max_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Consecutive HIGH (or NORMAL) dispatches allowed while a lower tier waits.
    pub starvation_threshold_k: u32,
    pub shutdown_grace_seconds: u64,
    pub maintenance_interval_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 50,
            queue_capacity_per_tier: 1_000,
            rate_limit_window_seconds: 10,
            rate_limit_max_events: 5,
            rate_window_idle_ttl_seconds: 300,
            task_timeout_seconds: 30,
            timeout_hard_cap_seconds: 2,
            max_retry_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 60_000,
            starvation_threshold_k: 4,
            shutdown_grace_seconds: 30,
            maintenance_interval_seconds: 30,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("worker_pool_size", self.worker_pool_size as u64),
            ("queue_capacity_per_tier", self.queue_capacity_per_tier as u64),
            ("rate_limit_window_seconds", self.rate_limit_window_seconds),
            ("rate_limit_max_events", self.rate_limit_max_events as u64),
            ("task_timeout_seconds", self.task_timeout_seconds),
            ("max_retry_attempts", u64::from(self.max_retry_attempts)),
            ("starvation_threshold_k", u64::from(self.starvation_threshold_k)),
            ("maintenance_interval_seconds", self.maintenance_interval_seconds),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::MustBePositive(field));
            }
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry_max_delay_ms ({}) is below retry_base_delay_ms ({})",
                self.retry_max_delay_ms, self.retry_base_delay_ms
            )));
        }
        if self.rate_window_idle_ttl_seconds < self.rate_limit_window_seconds {
            return Err(ConfigError::Invalid(format!(
                "rate_window_idle_ttl_seconds ({}) is shorter than rate_limit_window_seconds ({})",
                self.rate_window_idle_ttl_seconds, self.rate_limit_window_seconds
            )));
        }
        Ok(())
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_seconds)
    }

    pub fn rate_window_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.rate_window_idle_ttl_seconds)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }

    pub fn timeout_hard_cap(&self) -> Duration {
        Duration::from_secs(self.timeout_hard_cap_seconds)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_pool_size, 50);
        assert_eq!(config.rate_limit_max_events, 5);
        assert_eq!(config.starvation_threshold_k, 4);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = EngineConfig::from_json_str(r#"{"worker_pool_size": 8}"#).unwrap();
        assert_eq!(config.worker_pool_size, 8);
        assert_eq!(config.queue_capacity_per_tier, 1_000);
        assert_eq!(config.task_timeout(), Duration::from_secs(30));
    }

    #[rstest]
    #[case::pool(r#"{"worker_pool_size": 0}"#, "worker_pool_size")]
    #[case::capacity(r#"{"queue_capacity_per_tier": 0}"#, "queue_capacity_per_tier")]
    #[case::window(r#"{"rate_limit_window_seconds": 0}"#, "rate_limit_window_seconds")]
    #[case::attempts(r#"{"max_retry_attempts": 0}"#, "max_retry_attempts")]
    #[case::k(r#"{"starvation_threshold_k": 0}"#, "starvation_threshold_k")]
    fn zero_values_are_rejected(#[case] json: &str, #[case] field: &str) {
        let err = EngineConfig::from_json_str(json).unwrap_err();
        assert!(matches!(err, ConfigError::MustBePositive(f) if f == field));
    }

    #[rstest]
    #[case::retry_delays(r#"{"retry_base_delay_ms": 10, "retry_max_delay_ms": 5}"#)]
    #[case::idle_ttl_below_window(r#"{"rate_limit_window_seconds": 10, "rate_window_idle_ttl_seconds": 1}"#)]
    #[case::zero_idle_ttl(r#"{"rate_window_idle_ttl_seconds": 0}"#)]
    fn inconsistent_values_are_rejected(#[case] json: &str) {
        let err = EngineConfig::from_json_str(json).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = EngineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
