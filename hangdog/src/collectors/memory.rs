//! Process and device memory
//!
//! Process figures come from `/proc/self/status`, device figures from
//! `/proc/meminfo`. Both report kB; values here are bytes, `-1` when a line
//! is missing or the file is unreadable.

use hangdog_common::{Collector, CollectorError};
use serde_json::{json, Value};
use std::path::PathBuf;

use super::read_trimmed;

pub const NAME: &str = "MemoryCollector";

/// Below this much total memory the host counts as low-memory
pub const LOW_MEMORY_TOTAL_BYTES: i64 = 1 << 30;

const STATUS_PATH: &str = "/proc/self/status";
const MEMINFO_PATH: &str = "/proc/meminfo";

/// Value of a `Key:   1234 kB` line, in bytes
#[must_use]
pub fn kb_field(content: &str, key: &str) -> Option<i64> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix(key)?.strip_prefix(':')?;
        let kb: i64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(kb * 1024)
    })
}

/// True if `/proc/meminfo` reports under 1 GiB total. Unknown counts as not low.
#[must_use]
pub fn detect_low_memory() -> bool {
    read_trimmed(MEMINFO_PATH)
        .ok()
        .and_then(|m| kb_field(&m, "MemTotal"))
        .is_some_and(|total| total < LOW_MEMORY_TOTAL_BYTES)
}

pub struct MemoryCollector {
    status_path: PathBuf,
    meminfo_path: PathBuf,
}

impl MemoryCollector {
    #[must_use]
    pub fn with_paths(status: impl Into<PathBuf>, meminfo: impl Into<PathBuf>) -> Self {
        Self { status_path: status.into(), meminfo_path: meminfo.into() }
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::with_paths(STATUS_PATH, MEMINFO_PATH)
    }
}

impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn collect(&self) -> Result<Value, CollectorError> {
        let status = read_trimmed(&self.status_path).unwrap_or_default();
        let meminfo = read_trimmed(&self.meminfo_path).unwrap_or_default();
        let field = |content: &str, key: &str| kb_field(content, key).unwrap_or(-1);

        let total = field(&meminfo, "MemTotal");
        Ok(json!({
            "process_rss": field(&status, "VmRSS"),
            "process_peak_rss": field(&status, "VmHWM"),
            "process_virtual": field(&status, "VmSize"),
            "device_total": total,
            "device_available": field(&meminfo, "MemAvailable"),
            "low_memory": total >= 0 && total < LOW_MEMORY_TOTAL_BYTES,
        }))
    }
}
