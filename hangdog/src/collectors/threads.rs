//! Threads of the process with name and scheduler state
//!
//! The monitored thread is listed first and flagged, so a reader of a hang
//! dump sees right away whether it was running, sleeping or in disk wait.

use anyhow::Context as _;
use hangdog_common::{Collector, CollectorError};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::read_trimmed;
use crate::host::HostLooper;

pub const NAME: &str = "ThreadCollector";

const TASK_DIR: &str = "/proc/self/task";

#[derive(Debug, Serialize)]
struct ThreadEntry {
    tid: i64,
    name: String,
    state: String,
    monitored: bool,
}

pub struct ThreadCollector {
    host: Arc<dyn HostLooper>,
    task_dir: PathBuf,
}

impl ThreadCollector {
    #[must_use]
    pub fn new(host: Arc<dyn HostLooper>) -> Self {
        Self::with_task_dir(host, TASK_DIR)
    }

    #[must_use]
    pub fn with_task_dir(host: Arc<dyn HostLooper>, dir: impl Into<PathBuf>) -> Self {
        Self { host, task_dir: dir.into() }
    }
}

/// State letter from `/proc/<pid>/task/<tid>/stat`.
///
/// The comm field may contain spaces and parentheses, so the state is the
/// first token after the last `)`.
fn parse_state(stat: &str) -> Option<&str> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.split_whitespace().next()
}

fn read_entry(dir: &Path, tid: i64, monitored_tid: i64) -> ThreadEntry {
    let name = read_trimmed(dir.join("comm")).unwrap_or_default();
    let state = read_trimmed(dir.join("stat"))
        .ok()
        .and_then(|s| parse_state(&s).map(str::to_string))
        .unwrap_or_else(|| "?".to_string());
    ThreadEntry { tid, name, state, monitored: tid == monitored_tid }
}

impl Collector for ThreadCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn collect(&self) -> Result<Value, CollectorError> {
        let monitored_tid = self.host.monitored_thread().map_or(0, |t| t.tid);

        let entries = std::fs::read_dir(&self.task_dir)
            .with_context(|| format!("Failed to list {}", self.task_dir.display()))
            .map_err(|e| CollectorError::Failed(format!("{e:#}")))?;

        let mut threads: Vec<ThreadEntry> = entries
            .flatten()
            .filter_map(|entry| {
                let tid: i64 = entry.file_name().to_str()?.parse().ok()?;
                Some(read_entry(&entry.path(), tid, monitored_tid))
            })
            .collect();
        threads.sort_by_key(|t| (!t.monitored, t.tid));

        serde_json::to_value(&threads).map_err(|e| CollectorError::Failed(e.to_string()))
    }
}
