//! # Shared Vocabulary (engine ↔ collectors)
//!
//! Types and constants shared between the `hangdog` engine and anything that
//! plugs into it from outside. Third-party environment collectors only need
//! this crate.
//!
//! ## Key Items
//!
//! - [`DISPATCH_PREFIX`] / [`FINISH_PREFIX`] - Task marker format emitted by the host
//! - [`Marker`] - Parsed start/end marker
//! - [`EventKind`] - Which diagnostic event a collector set belongs to
//! - [`Collector`] - Stateless, independently failing environment data provider
//! - [`CollectorReport`] - One `{name, data}` or `{name, error}` slot of a dump

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

// ============================================================================
// Task Marker Format
// ============================================================================

/// Prefix of the marker the host emits right before running a task.
///
/// Everything after the prefix is the task content.
pub const DISPATCH_PREFIX: &str = ">>>>> Dispatching to ";

/// Prefix of the marker the host emits right after a task returns.
///
/// The payload is matched against the content of the in-flight record.
pub const FINISH_PREFIX: &str = "<<<<< Finished to ";

/// A classified task marker, borrowing its payload from the raw string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker<'a> {
    Dispatch(&'a str),
    Finish(&'a str),
}

impl<'a> Marker<'a> {
    /// Classify a raw marker by prefix. Anything else is not a marker.
    #[must_use]
    pub fn parse(raw: &'a str) -> Option<Self> {
        if let Some(payload) = raw.strip_prefix(DISPATCH_PREFIX) {
            Some(Marker::Dispatch(payload))
        } else {
            raw.strip_prefix(FINISH_PREFIX).map(Marker::Finish)
        }
    }

    #[must_use]
    pub fn payload(self) -> &'a str {
        match self {
            Marker::Dispatch(p) | Marker::Finish(p) => p,
        }
    }
}

// ============================================================================
// Event Kinds
// ============================================================================

/// Kind of diagnostic event delivered to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Monitored thread blocked beyond the hang threshold
    Hang,
    /// Completed task that took at least the slow-task threshold
    SlowTask,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Hang => "hang",
            EventKind::SlowTask => "slow_task",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Collectors
// ============================================================================

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("{0} is not available on this host")]
    Unavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// Environment data provider attached to a diagnostic event.
///
/// Collectors run on a dispatch worker, never on the monitored thread. A
/// failing collector only loses its own slot in the dump.
pub trait Collector: Send + Sync {
    /// Stable name; also the identity used to de-duplicate collector sets.
    fn name(&self) -> &str;

    /// Gather the data as structured key/value JSON.
    ///
    /// # Errors
    /// Any failure reading the underlying source.
    fn collect(&self) -> Result<Value, CollectorError>;
}

/// Outcome of one collector run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Data(Value),
    Error(String),
}

/// One slot of an environment dump: `{"name": .., "data": ..}` or
/// `{"name": .., "error": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorReport {
    pub name: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl CollectorReport {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

/// Run a collector, turning errors and panics into an error slot.
pub fn collect_report(collector: &dyn Collector) -> CollectorReport {
    let name = collector.name().to_string();
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| collector.collect())) {
        Ok(Ok(data)) => Outcome::Data(data),
        Ok(Err(e)) => Outcome::Error(format!("collect data failed: {e}")),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            Outcome::Error(format!("collect data failed: {msg}"))
        }
    };
    CollectorReport { name, outcome }
}

/// Serialize a dump as a JSON array. Serialization failure yields an empty string.
#[must_use]
pub fn render_reports(reports: &[CollectorReport]) -> String {
    serde_json::to_string(reports).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed;

    impl Collector for Fixed {
        fn name(&self) -> &str {
            "FixedCollector"
        }

        fn collect(&self) -> Result<Value, CollectorError> {
            Ok(json!({ "open_fd": 12 }))
        }
    }

    struct Broken;

    impl Collector for Broken {
        fn name(&self) -> &str {
            "BrokenCollector"
        }

        fn collect(&self) -> Result<Value, CollectorError> {
            Err(CollectorError::Unavailable("battery".to_string()))
        }
    }

    struct Panicky;

    impl Collector for Panicky {
        fn name(&self) -> &str {
            "PanickyCollector"
        }

        fn collect(&self) -> Result<Value, CollectorError> {
            panic!("sensor exploded")
        }
    }

    #[test]
    fn test_report_shapes() {
        let reports = vec![collect_report(&Fixed), collect_report(&Broken)];
        let rendered: Value = serde_json::from_str(&render_reports(&reports)).unwrap();

        assert_eq!(rendered[0]["name"], "FixedCollector");
        assert_eq!(rendered[0]["data"]["open_fd"], 12);
        assert!(rendered[0].get("error").is_none());

        assert_eq!(rendered[1]["name"], "BrokenCollector");
        assert_eq!(
            rendered[1]["error"],
            "collect data failed: battery is not available on this host"
        );
    }

    #[test]
    fn test_panicking_collector_becomes_error_slot() {
        let report = collect_report(&Panicky);
        assert!(report.is_error());
        assert_eq!(report.outcome, Outcome::Error("collect data failed: sensor exploded".into()));
    }

    #[test]
    fn test_marker_parse() {
        assert_eq!(
            Marker::parse(">>>>> Dispatching to Handler (ui) {1f} cb: 0"),
            Some(Marker::Dispatch("Handler (ui) {1f} cb: 0"))
        );
        assert_eq!(
            Marker::parse("<<<<< Finished to Handler (ui) {1f} cb"),
            Some(Marker::Finish("Handler (ui) {1f} cb"))
        );
        assert_eq!(Marker::parse("Dispatching to nothing"), None);
        assert_eq!(Marker::parse(">>>>> Dispatching to ").map(Marker::payload), Some(""));
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::Hang.to_string(), "hang");
        assert_eq!(EventKind::SlowTask.to_string(), "slow_task");
        assert_eq!(serde_json::to_string(&EventKind::SlowTask).unwrap(), "\"slow_task\"");
    }
}
