//! Diagnostic events and their delivery
//!
//! [`Reporter`] is what a dispatch job carries: the listener, the two
//! collector sets and the diagnostics switch. It logs the event block, runs
//! the environment dump and hands the finished event to the listener, all on
//! a dispatch worker.

use hangdog_common::{collect_report, render_reports, Collector, EventKind};
use log::{error, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::clock::{format_timestamp, LOG_TIME_PATTERN};
use crate::domain::Timestamp;
use crate::sampling::SamplingRecord;

/// A hang or slow task, as delivered to the host
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEvent {
    pub kind: EventKind,
    pub detected_at: Timestamp,
    pub stack: String,
    pub current: Option<SamplingRecord>,
    /// Most recent first; always empty for slow tasks
    pub history: Vec<SamplingRecord>,
    /// JSON array of collector slots, or empty when diagnostics are off
    pub environment: String,
}

/// Host callbacks. Never invoked on the monitored thread.
pub trait EventListener: Send + Sync {
    fn on_hang(&self, event: DiagnosticEvent) {
        let _ = event;
    }

    fn on_slow_task(&self, event: DiagnosticEvent) {
        let _ = event;
    }
}

/// Keep the first collector of every name.
pub(crate) fn dedup_by_name(collectors: Vec<Arc<dyn Collector>>) -> Vec<Arc<dyn Collector>> {
    let mut seen = HashSet::new();
    collectors
        .into_iter()
        .filter(|c| seen.insert(c.name().to_string()))
        .collect()
}

pub(crate) struct Reporter {
    pub listener: Option<Arc<dyn EventListener>>,
    pub hang_collectors: Vec<Arc<dyn Collector>>,
    pub slow_task_collectors: Vec<Arc<dyn Collector>>,
    pub diagnostics_enabled: bool,
}

impl Reporter {
    /// Run the collector set of `kind` and render it.
    pub fn environment(&self, kind: EventKind) -> String {
        if !self.diagnostics_enabled {
            return String::new();
        }
        let collectors = match kind {
            EventKind::Hang => &self.hang_collectors,
            EventKind::SlowTask => &self.slow_task_collectors,
        };
        let reports: Vec<_> = collectors.iter().map(|c| collect_report(c.as_ref())).collect();
        render_reports(&reports)
    }

    /// Log, fill in the environment and deliver. Runs on a dispatch worker.
    pub fn deliver(&self, mut event: DiagnosticEvent) {
        match event.kind {
            EventKind::Hang => error!("{}", hang_block(&event)),
            EventKind::SlowTask => warn!("{}", slow_task_block(&event)),
        }
        event.environment = self.environment(event.kind);

        let Some(listener) = &self.listener else {
            return;
        };
        match event.kind {
            EventKind::Hang => listener.on_hang(event),
            EventKind::SlowTask => listener.on_slow_task(event),
        }
    }
}

fn time(ts: Timestamp) -> String {
    format_timestamp(ts, LOG_TIME_PATTERN)
}

fn hang_block(event: &DiagnosticEvent) -> String {
    let mut out = String::from("-----Hang Event-----\n");
    if let Some(record) = &event.current {
        let _ = writeln!(out, "start time: {}", time(record.started_at()));
        let _ = writeln!(out, "content: {}", record.content());
    }
    let _ = writeln!(out, "detected at: {}", time(event.detected_at));
    let _ = write!(out, "stack:\n{}", event.stack);
    out
}

fn slow_task_block(event: &DiagnosticEvent) -> String {
    let mut out = String::from("-----Slow Task-----\n");
    if let Some(record) = &event.current {
        let _ = writeln!(out, "start time: {}", time(record.started_at()));
        if let Some(finished) = record.finished_at() {
            let _ = writeln!(out, "end time: {}", time(finished));
        }
        if let Some(ms) = record.duration_ms() {
            let _ = writeln!(out, "duration: {ms}ms");
        }
        let _ = writeln!(out, "content: {}", record.content());
    }
    let _ = write!(out, "stack:\n{}", event.stack);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangdog_common::CollectorError;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    struct Named(&'static str, i64);

    impl Collector for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn collect(&self) -> Result<Value, CollectorError> {
            Ok(json!({ "value": self.1 }))
        }
    }

    struct Failing;

    impl Collector for Failing {
        fn name(&self) -> &str {
            "FailingCollector"
        }

        fn collect(&self) -> Result<Value, CollectorError> {
            Err(CollectorError::Failed("sensor offline".to_string()))
        }
    }

    #[derive(Default)]
    struct Captured(Mutex<Vec<DiagnosticEvent>>);

    impl EventListener for Captured {
        fn on_slow_task(&self, event: DiagnosticEvent) {
            self.0.lock().push(event);
        }
    }

    fn event(kind: EventKind) -> DiagnosticEvent {
        DiagnosticEvent {
            kind,
            detected_at: Timestamp(1_700_000_000_000),
            stack: "#0 main".to_string(),
            current: None,
            history: Vec::new(),
            environment: String::new(),
        }
    }

    fn reporter(enabled: bool, listener: Option<Arc<dyn EventListener>>) -> Reporter {
        Reporter {
            listener,
            hang_collectors: vec![Arc::new(Named("A", 1)), Arc::new(Failing)],
            slow_task_collectors: vec![Arc::new(Named("B", 2))],
            diagnostics_enabled: enabled,
        }
    }

    #[test]
    fn test_dedup_keeps_first() {
        let kept = dedup_by_name(vec![
            Arc::new(Named("A", 1)),
            Arc::new(Named("B", 2)),
            Arc::new(Named("A", 3)),
        ]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].collect().unwrap()["value"], 1);
    }

    #[test]
    fn test_environment_per_kind() {
        let reporter = reporter(true, None);

        let hang: Value = serde_json::from_str(&reporter.environment(EventKind::Hang)).unwrap();
        assert_eq!(hang[0]["name"], "A");
        assert_eq!(hang[1]["error"], "collect data failed: sensor offline");

        let slow: Value = serde_json::from_str(&reporter.environment(EventKind::SlowTask)).unwrap();
        assert_eq!(slow.as_array().unwrap().len(), 1);
        assert_eq!(slow[0]["data"]["value"], 2);
    }

    #[test]
    fn test_disabled_diagnostics_leave_environment_empty() {
        let captured = Arc::new(Captured::default());
        let reporter = reporter(false, Some(captured.clone()));
        reporter.deliver(event(EventKind::SlowTask));

        let events = captured.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].environment, "");
    }

    #[test]
    fn test_deliver_routes_by_kind() {
        let captured = Arc::new(Captured::default());
        let reporter = reporter(true, Some(captured.clone()));
        // Captured only overrides on_slow_task; hangs go to the no-op default
        reporter.deliver(event(EventKind::Hang));
        reporter.deliver(event(EventKind::SlowTask));

        let events = captured.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::SlowTask);
        assert!(events[0].environment.contains("\"B\""));
    }

    #[test]
    fn test_blocks_have_headers() {
        assert!(hang_block(&event(EventKind::Hang)).starts_with("-----Hang Event-----"));
        let slow = slow_task_block(&event(EventKind::SlowTask));
        assert!(slow.starts_with("-----Slow Task-----"));
        assert!(slow.ends_with("#0 main"));
    }
}
