//! Scheduler configuration (`tickwork.toml`)

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunables for the engine. Every field has a default, so an empty TOML
/// document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Host ticks per wall-clock second (used for time-of-day scheduling)
    pub ticks_per_second: u32,

    /// How long a dispatched async task stays in the recent-activity log
    pub recent_window_ticks: u64,

    /// Tick assumed before the first heartbeat
    pub initial_tick: u64,

    /// Name prefix for worker pool threads
    pub worker_name_prefix: String,

    /// Idle worker threads exit after this long
    pub worker_keep_alive_ms: u64,

    /// Capacity of the async fault channel
    pub fault_capacity: usize,

    /// Period of the self-cleaning task
    pub cleanup_interval_ticks: u64,

    /// Finished runner entries idle for longer than this are purged
    pub cleanup_grace_ms: u64,

    /// Number of polls for active workers during shutdown
    pub shutdown_poll_attempts: u32,

    /// Sleep between shutdown polls
    pub shutdown_poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: 20,
            recent_window_ticks: 30,
            initial_tick: 0,
            worker_name_prefix: "tickwork-worker".to_string(),
            worker_keep_alive_ms: 60_000,
            fault_capacity: 256,
            // 10 minutes at 20 tps
            cleanup_interval_ticks: 12_000,
            cleanup_grace_ms: 10_000,
            shutdown_poll_attempts: 50,
            shutdown_poll_interval_ms: 50,
        }
    }
}

impl SchedulerConfig {
    /// Parse a config from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a config from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticks_per_second == 0 {
            return Err(ConfigError::Invalid(
                "ticks_per_second must be positive".to_string(),
            ));
        }
        if self.recent_window_ticks == 0 {
            return Err(ConfigError::Invalid(
                "recent_window_ticks must be positive".to_string(),
            ));
        }
        if self.cleanup_interval_ticks == 0 {
            return Err(ConfigError::Invalid(
                "cleanup_interval_ticks must be positive".to_string(),
            ));
        }
        if self.fault_capacity == 0 {
            return Err(ConfigError::Invalid(
                "fault_capacity must be positive".to_string(),
            ));
        }
        if self.worker_name_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "worker_name_prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn worker_keep_alive(&self) -> Duration {
        Duration::from_millis(self.worker_keep_alive_ms)
    }

    pub(crate) fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }

    pub(crate) fn shutdown_poll_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_interval_ms)
    }
}
