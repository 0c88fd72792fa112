//! Log setup
//!
//! The engine logs through the `log` facade only. Reports use fixed levels:
//! hangs at `error`, slow tasks at `warn`, engine internals at `debug`.
//! [`init`] installs `env_logger` for hosts that have no logger of their own.

use env_logger::{Builder, Target};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Verbosity of the engine's own log output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    None,
    Error,
    #[default]
    Warn,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::None => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Debug => LevelFilter::Debug,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::None => "none",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

/// Where log lines go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogTarget {
    #[default]
    Stderr,
    Stdout,
}

/// Install `env_logger` for the `hangdog` targets at `level`.
///
/// `RUST_LOG` still overrides per module. Returns false if a logger was
/// already installed, which is not an error.
pub fn init(level: LogLevel, target: LogTarget) -> bool {
    let mut builder = Builder::new();
    builder
        .filter_level(LevelFilter::Warn)
        .filter_module("hangdog", level.to_level_filter())
        .parse_default_env()
        .target(match target {
            LogTarget::Stderr => Target::Stderr,
            LogTarget::Stdout => Target::Stdout,
        });
    builder.try_init().is_ok()
}
