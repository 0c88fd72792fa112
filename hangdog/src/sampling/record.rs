//! Task and sampling records
//!
//! [`TaskRecord`] is the raw marker in transit from the monitored thread to
//! the pipeline. [`SamplingRecord`] is the timing/state record of one task
//! execution kept in the history buffer. Both are reused in place: a reset
//! clears the string buffers instead of allocating new ones.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::Timestamp;

/// Raw task marker plus the time it was observed on the monitored thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    content: String,
    enqueued_at: Timestamp,
}

impl TaskRecord {
    #[must_use]
    pub fn new(marker: &str, enqueued_at: Timestamp) -> Self {
        Self { content: marker.to_string(), enqueued_at }
    }

    /// Refill a recycled record, keeping its buffer
    pub fn reset(&mut self, marker: &str, enqueued_at: Timestamp) {
        self.content.clear();
        self.content.push_str(marker);
        self.enqueued_at = enqueued_at;
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn enqueued_at(&self) -> Timestamp {
        self.enqueued_at
    }
}

/// Execution state of a sampled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStatus {
    /// Currently executing on the monitored thread
    Started,
    /// End marker received; duration known
    Finished,
}

/// Timing and state of one task execution on the monitored thread
///
/// Note: a record delivered with a hang event is usually still `Started`,
/// with no end timestamp and no duration, because the task never returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingRecord {
    id: u64,
    sequence_index: u64,
    content: String,
    started_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    finished_at: Option<Timestamp>,
    /// Milliseconds; present only once finished
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<u64>,
    status: SamplingStatus,
    complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<String>,
}

impl SamplingRecord {
    pub(crate) fn started(id: u64, sequence_index: u64, content: &str, started_at: Timestamp) -> Self {
        Self {
            id,
            sequence_index,
            content: content.to_string(),
            started_at,
            finished_at: None,
            duration: None,
            status: SamplingStatus::Started,
            complete: false,
            stack: None,
        }
    }

    /// Reuse this slot for a new start marker
    pub(crate) fn restart(
        &mut self,
        id: u64,
        sequence_index: u64,
        content: &str,
        started_at: Timestamp,
    ) {
        self.id = id;
        self.sequence_index = sequence_index;
        self.content.clear();
        self.content.push_str(content);
        self.started_at = started_at;
        self.finished_at = None;
        self.duration = None;
        self.status = SamplingStatus::Started;
        self.complete = false;
        self.stack = None;
    }

    pub(crate) fn finish(&mut self, finished_at: Timestamp) {
        let duration = finished_at.saturating_duration_since(self.started_at);
        self.finished_at = Some(finished_at);
        self.duration = Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
        self.status = SamplingStatus::Finished;
        self.complete = true;
    }

    pub(crate) fn set_stack(&mut self, stack: String) {
        self.stack = Some(stack);
    }

    /// Unique for the lifetime of the model, starting at 1
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn sequence_index(&self) -> u64 {
        self.sequence_index
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    #[must_use]
    pub fn finished_at(&self) -> Option<Timestamp> {
        self.finished_at
    }

    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.duration.map(Duration::from_millis)
    }

    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        self.duration
    }

    #[must_use]
    pub fn status(&self) -> SamplingStatus {
        self.status
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    #[must_use]
    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }
}
