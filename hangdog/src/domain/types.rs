//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep wall-clock milliseconds, timer handles and
//! looper handles from being mixed up, and make signatures say which thread
//! a value belongs to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::thread::ThreadId;
use std::time::Duration;

/// Wall-clock timestamp in milliseconds since the Unix epoch
///
/// Produced by [`crate::clock::Clock`], which corrects it with the monotonic
/// clock so user changes to the system time do not move it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Convert to microseconds (Chrome trace resolution)
    pub fn as_micros(self) -> u64 {
        self.0.saturating_mul(1_000)
    }

    /// Elapsed time from `earlier` to `self`, zero if `earlier` is later
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Handle of a delayed job on one of the engine's timer threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(pub u64);

impl TimerToken {
    /// Sentinel stored in atomics when nothing is pending
    pub const NONE: TimerToken = TimerToken(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Handle of a task posted on the host's monitored looper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskToken(pub u64);

impl TaskToken {
    pub const NONE: TaskToken = TaskToken(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TaskToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Identity of the sampling pipeline thread
///
/// Every component fed by the pipeline (model, watchdog, stack capture)
/// holds a clone of the same `Arc<PipelineIdentity>` and ignores calls whose
/// caller token does not match. The pipeline thread binds itself once, as
/// the first thing it does.
#[derive(Debug, Default)]
pub struct PipelineIdentity(OnceLock<ThreadId>);

impl PipelineIdentity {
    /// Bind the pipeline thread. Later binds are ignored.
    pub fn bind(&self, id: ThreadId) {
        let _ = self.0.set(id);
    }

    /// True when `caller` is the bound pipeline thread
    pub fn is(&self, caller: ThreadId) -> bool {
        self.0.get() == Some(&caller)
    }

    pub fn get(&self) -> Option<ThreadId> {
        self.0.get().copied()
    }
}
