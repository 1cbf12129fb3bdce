pub mod config;
pub mod simulate;

use std::path::Path;

use anyhow::Context;
use tickwork_engine::SchedulerConfig;

/// Load the config file if one was given, defaults otherwise.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<SchedulerConfig> {
    match path {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => Ok(SchedulerConfig::default()),
    }
}
