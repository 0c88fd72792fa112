//! Structured error types for hangdog
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HangdogError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("Unknown collector {name:?} in {field}")]
    UnknownCollector { field: &'static str, name: String },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Why a stack snapshot of the monitored thread could not be taken
///
/// Capture is best-effort; callers log these at debug level and move on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Monitored thread is not running yet")]
    NoMonitoredThread,

    #[error("Stack sampling is not supported on this platform")]
    Unsupported,

    #[error("Failed to signal the monitored thread: errno {0}")]
    SignalFailed(i32),

    #[error("Monitored thread did not answer the sample request within {0}ms")]
    Timeout(u64),

    #[error("Another sample is still in flight")]
    Busy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = HangdogError::from(ConfigError::ZeroValue { field: "slow_task_threshold_ms" });
        assert_eq!(
            err.to_string(),
            "Invalid configuration: slow_task_threshold_ms must be greater than zero"
        );
    }

    #[test]
    fn test_thread_spawn_error() {
        let err = HangdogError::ThreadSpawn {
            name: "hangdog-watchdog".to_string(),
            source: std::io::Error::other("resource temporarily unavailable"),
        };
        assert!(err.to_string().contains("hangdog-watchdog"));
        assert!(err.to_string().contains("resource temporarily unavailable"));
    }

    #[test]
    fn test_capture_timeout_display() {
        assert_eq!(
            CaptureError::Timeout(100).to_string(),
            "Monitored thread did not answer the sample request within 100ms"
        );
    }
}
