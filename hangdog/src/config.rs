//! Engine configuration
//!
//! Every field has a default, so a JSON file only needs the values it
//! changes:
//!
//! ```json
//! { "foreground_hang_threshold_ms": 2000, "log_level": "debug" }
//! ```
//!
//! The listener and custom collectors are not data; they are attached on
//! [`crate::HangdogBuilder`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::collectors;
use crate::domain::ConfigError;
use crate::logging::{LogLevel, LogTarget};

pub const DEFAULT_FOREGROUND_HANG_THRESHOLD_MS: u64 = 4000;
pub const DEFAULT_BACKGROUND_HANG_THRESHOLD_MS: u64 = 8000;
pub const DEFAULT_SLOW_TASK_THRESHOLD_MS: u64 = 300;
pub const DEFAULT_HISTORY_CACHE_SIZE: usize = 30;
pub const DEFAULT_MIN_RACE_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub foreground_hang_threshold_ms: u64,
    pub background_hang_threshold_ms: u64,
    pub slow_task_threshold_ms: u64,
    pub history_cache_size: usize,
    pub min_race_interval_ms: u64,
    /// Run collectors on events; disabled means an empty environment dump
    pub diagnostics_enabled: bool,
    /// Shrink buffers; detected from total memory when unset
    pub low_memory: Option<bool>,
    /// Applied by `HangdogBuilder::build` unless a logger is already installed
    pub log_level: LogLevel,
    pub log_target: LogTarget,
    pub hang_collectors: Vec<String>,
    pub slow_task_collectors: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            foreground_hang_threshold_ms: DEFAULT_FOREGROUND_HANG_THRESHOLD_MS,
            background_hang_threshold_ms: DEFAULT_BACKGROUND_HANG_THRESHOLD_MS,
            slow_task_threshold_ms: DEFAULT_SLOW_TASK_THRESHOLD_MS,
            history_cache_size: DEFAULT_HISTORY_CACHE_SIZE,
            min_race_interval_ms: DEFAULT_MIN_RACE_INTERVAL_MS,
            diagnostics_enabled: true,
            low_memory: None,
            log_level: LogLevel::default(),
            log_target: LogTarget::default(),
            hang_collectors: collectors::DEFAULT_HANG_SET.iter().map(ToString::to_string).collect(),
            slow_task_collectors: collectors::DEFAULT_SLOW_TASK_SET
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl Config {
    /// Parse a JSON document; missing fields keep their defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] on malformed JSON or unknown fields.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// # Errors
    /// Returns [`ConfigError::Read`] if the file cannot be read, otherwise as
    /// [`Config::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_json_str(&content)
    }

    /// # Errors
    /// Returns the first zero threshold/size or unknown collector name found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("foreground_hang_threshold_ms", self.foreground_hang_threshold_ms),
            ("background_hang_threshold_ms", self.background_hang_threshold_ms),
            ("slow_task_threshold_ms", self.slow_task_threshold_ms),
            ("history_cache_size", self.history_cache_size as u64),
            ("min_race_interval_ms", self.min_race_interval_ms),
        ];
        if let Some(&(field, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ZeroValue { field });
        }

        for (field, names) in
            [("hang_collectors", &self.hang_collectors), ("slow_task_collectors", &self.slow_task_collectors)]
        {
            if let Some(name) = names.iter().find(|n| !collectors::is_known(n)) {
                return Err(ConfigError::UnknownCollector { field, name: name.clone() });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn with_hang_thresholds(mut self, foreground_ms: u64, background_ms: u64) -> Self {
        self.foreground_hang_threshold_ms = foreground_ms;
        self.background_hang_threshold_ms = background_ms;
        self
    }

    #[must_use]
    pub fn with_slow_task_threshold(mut self, ms: u64) -> Self {
        self.slow_task_threshold_ms = ms;
        self
    }

    #[must_use]
    pub fn with_history_cache_size(mut self, size: usize) -> Self {
        self.history_cache_size = size;
        self
    }

    #[must_use]
    pub fn with_min_race_interval(mut self, ms: u64) -> Self {
        self.min_race_interval_ms = ms;
        self
    }

    #[must_use]
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_low_memory(mut self, low_memory: bool) -> Self {
        self.low_memory = Some(low_memory);
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    #[must_use]
    pub fn with_collectors(mut self, hang: &[&str], slow_task: &[&str]) -> Self {
        self.hang_collectors = hang.iter().map(ToString::to_string).collect();
        self.slow_task_collectors = slow_task.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn foreground_hang_threshold(&self) -> Duration {
        Duration::from_millis(self.foreground_hang_threshold_ms)
    }

    #[must_use]
    pub fn background_hang_threshold(&self) -> Duration {
        Duration::from_millis(self.background_hang_threshold_ms)
    }

    #[must_use]
    pub fn slow_task_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_task_threshold_ms)
    }

    #[must_use]
    pub fn min_race_interval(&self) -> Duration {
        Duration::from_millis(self.min_race_interval_ms)
    }

    /// Explicit setting, else whether the host has under 1 GiB of memory
    #[must_use]
    pub fn is_low_memory(&self) -> bool {
        self.low_memory.unwrap_or_else(collectors::memory::detect_low_memory)
    }

    /// History capacity after the low-memory reduction
    #[must_use]
    pub fn effective_cache_size(&self, low_memory: bool) -> usize {
        if low_memory {
            (self.history_cache_size / 2).max(1)
        } else {
            self.history_cache_size.max(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.foreground_hang_threshold(), Duration::from_secs(4));
        assert_eq!(config.background_hang_threshold(), Duration::from_secs(8));
        assert_eq!(config.slow_task_threshold(), Duration::from_millis(300));
        assert_eq!(config.history_cache_size, 30);
        assert_eq!(config.min_race_interval(), Duration::from_millis(500));
        assert!(config.diagnostics_enabled);
        assert_eq!(config.log_level, LogLevel::Warn);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            Config::from_json_str(r#"{"slow_task_threshold_ms": 100, "log_level": "debug"}"#).unwrap();
        assert_eq!(config.slow_task_threshold_ms, 100);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.foreground_hang_threshold_ms, DEFAULT_FOREGROUND_HANG_THRESHOLD_MS);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = Config::from_json_str(r#"{"slow_threshold": 100}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validate_zero_and_unknown_collector() {
        let zero = Config::default().with_slow_task_threshold(0);
        assert!(matches!(
            zero.validate(),
            Err(ConfigError::ZeroValue { field: "slow_task_threshold_ms" })
        ));

        let unknown = Config::default().with_collectors(&["AppCollector", "GpuCollector"], &[]);
        match unknown.validate() {
            Err(ConfigError::UnknownCollector { field, name }) => {
                assert_eq!(field, "hang_collectors");
                assert_eq!(name, "GpuCollector");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_low_memory_halves_cache() {
        let config = Config::default().with_history_cache_size(30).with_low_memory(true);
        assert!(config.is_low_memory());
        assert_eq!(config.effective_cache_size(true), 15);
        assert_eq!(config.effective_cache_size(false), 30);
        assert_eq!(Config::default().with_history_cache_size(1).effective_cache_size(true), 1);
    }
}
