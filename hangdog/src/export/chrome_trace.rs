use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::io::Write;

use crate::controller::DiagnosticEvent;
use crate::sampling::{SamplingRecord, SamplingStatus};

/// Track of the monitored thread in the exported trace
const MONITORED_TID: u32 = 1;

/// Chrome Trace Event format
/// Format reference: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChromeTraceEvent {
    /// Task content or event kind
    name: String,
    cat: String,
    /// Phase: "X" = complete, "i" = instant, "M" = metadata
    ph: String,
    /// Timestamp in microseconds
    ts: f64,
    /// Duration in microseconds, complete events only
    #[serde(skip_serializing_if = "Option::is_none")]
    dur: Option<f64>,
    /// Instant scope ("t" = thread)
    #[serde(skip_serializing_if = "Option::is_none")]
    s: Option<String>,
    pid: u32,
    tid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<HashMap<String, JsonValue>>,
}

#[derive(Debug, Serialize)]
struct ChromeTrace {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<ChromeTraceEvent>,
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: String,
}

/// Collects diagnostic events into a Chrome trace
///
/// Task records become complete slices on the monitored-thread track, each
/// record once even if several events carry it. Detections become instants.
pub struct ChromeTraceExporter {
    events: Vec<ChromeTraceEvent>,
    seen_records: HashSet<u64>,
    pid: u32,
}

impl ChromeTraceExporter {
    #[must_use]
    pub fn new() -> Self {
        Self { events: Vec::new(), seen_records: HashSet::new(), pid: std::process::id() }
    }

    /// Add a hang or slow-task event with the records it carries
    pub fn add_event(&mut self, event: &DiagnosticEvent) {
        let detected_us = event.detected_at.as_micros();

        for record in event.current.iter().chain(&event.history) {
            self.add_record(record, detected_us);
        }

        let mut args = HashMap::new();
        if let Some(record) = &event.current {
            args.insert("content".to_string(), json!(record.content()));
            args.insert("record_id".to_string(), json!(record.id()));
        }
        if !event.stack.is_empty() {
            args.insert("stack".to_string(), json!(event.stack));
        }
        self.events.push(ChromeTraceEvent {
            name: event.kind.to_string(),
            cat: "detection".to_string(),
            ph: "i".to_string(),
            ts: detected_us as f64,
            dur: None,
            s: Some("t".to_string()),
            pid: self.pid,
            tid: MONITORED_TID,
            args: Some(args),
        });
    }

    /// A record still in flight is drawn up to the detection time.
    fn add_record(&mut self, record: &SamplingRecord, detected_us: u64) {
        if !self.seen_records.insert(record.id()) {
            return;
        }
        let start_us = record.started_at().as_micros();
        let (dur_us, in_flight) = match (record.status(), record.finished_at()) {
            (SamplingStatus::Finished, Some(end)) => (end.as_micros().saturating_sub(start_us), false),
            _ => (detected_us.saturating_sub(start_us), true),
        };

        let mut args = HashMap::new();
        args.insert("record_id".to_string(), json!(record.id()));
        args.insert("sequence_index".to_string(), json!(record.sequence_index()));
        if in_flight {
            args.insert("in_flight".to_string(), json!(true));
        }
        if let Some(stack) = record.stack() {
            args.insert("stack".to_string(), json!(stack));
        }

        self.events.push(ChromeTraceEvent {
            name: record.content().to_string(),
            cat: "task".to_string(),
            ph: "X".to_string(),
            ts: start_us as f64,
            dur: Some(dur_us as f64),
            s: None,
            pid: self.pid,
            tid: MONITORED_TID,
            args: Some(args),
        });
    }

    /// Export the trace to any writer (file, stdout, buffer, etc.)
    ///
    /// Timestamps are rebased so the earliest event starts at zero.
    ///
    /// # Errors
    /// Returns an error if the JSON cannot be written.
    pub fn export<W: Write>(&self, writer: W) -> Result<()> {
        let base = self.events.iter().map(|e| e.ts).fold(f64::INFINITY, f64::min);
        let base = if base.is_finite() { base } else { 0.0 };

        let mut all_events: Vec<ChromeTraceEvent> = self
            .events
            .iter()
            .cloned()
            .map(|mut e| {
                e.ts -= base;
                e
            })
            .collect();

        let mut args = HashMap::new();
        args.insert("name".to_string(), json!("monitored thread"));
        all_events.push(ChromeTraceEvent {
            name: "thread_name".to_string(),
            cat: String::new(),
            ph: "M".to_string(),
            ts: 0.0,
            dur: None,
            s: None,
            pid: self.pid,
            tid: MONITORED_TID,
            args: Some(args),
        });

        let trace = ChromeTrace { trace_events: all_events, display_time_unit: "ms".to_string() };
        serde_json::to_writer_pretty(writer, &trace).context("Failed to write trace JSON")?;
        Ok(())
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

impl Default for ChromeTraceExporter {
    fn default() -> Self {
        Self::new()
    }
}
