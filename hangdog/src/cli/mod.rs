//! Command-line surface of the demonstration binary

pub mod args;

use anyhow::{Context, Result};
use std::time::Duration;

pub use args::Args;

use crate::config::Config;

/// Config file (if any) with the command-line flags layered on top
///
/// # Errors
/// Returns an error if the config file cannot be read or parsed.
pub fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(ms) = args.foreground_threshold {
        config.foreground_hang_threshold_ms = ms;
    }
    if let Some(ms) = args.background_threshold {
        config.background_hang_threshold_ms = ms;
    }
    if let Some(ms) = args.slow_threshold {
        config.slow_task_threshold_ms = ms;
    }
    if let Some(size) = args.cache_size {
        config.history_cache_size = size;
    }
    if args.no_diagnostics {
        config.diagnostics_enabled = false;
    }
    Ok(config)
}

/// Task durations of the demo run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    pub quick_tasks: usize,
    pub quick: Duration,
    /// Over the slow threshold, well under the hang threshold
    pub slow: Duration,
    pub stall: Duration,
}

impl Workload {
    #[must_use]
    pub fn plan(args: &Args, config: &Config) -> Self {
        let hang_ms = if args.background {
            config.background_hang_threshold_ms
        } else {
            config.foreground_hang_threshold_ms
        }
        .max(config.min_race_interval_ms);
        let slow_ms = config.slow_task_threshold_ms;

        // halfway between the two thresholds, at most twice the slow one
        let slow = if hang_ms > slow_ms {
            (slow_ms * 2).min(slow_ms + (hang_ms - slow_ms) / 2)
        } else {
            slow_ms
        };

        Self {
            quick_tasks: args.tasks,
            quick: Duration::from_millis(5),
            slow: Duration::from_millis(slow),
            stall: Duration::from_millis(args.stall.unwrap_or(hang_ms + 1000)),
        }
    }

    /// Upper bound of the whole run
    #[must_use]
    pub fn total(&self) -> Duration {
        let quick = self.quick * u32::try_from(self.quick_tasks).unwrap_or(u32::MAX);
        quick + self.slow + self.stall
    }
}
