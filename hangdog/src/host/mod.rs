//! Host abstraction
//!
//! The engine never runs code on the monitored thread by itself. Everything it
//! needs from the host goes through [`HostLooper`]: a marker hook, the
//! identity of the monitored thread and a way to post (and remove) a delayed
//! task on it. [`Looper`] is a complete serial executor implementing it, used
//! by the demo binary and the tests; GUI hosts implement the trait over their
//! own event loop.

#![allow(unsafe_code)]

pub mod foreground;
pub mod looper;

use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use crate::domain::TaskToken;

pub use foreground::{ForegroundProbe, Visibility};
pub use looper::Looper;

/// Callback the host invokes with every start/end marker.
pub type MarkerHook = Arc<dyn Fn(&str) + Send + Sync>;

/// A task posted on the monitored thread.
pub type HostTask = Box<dyn FnOnce() + Send>;

/// The thread whose blockage the engine detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoredThread {
    pub id: ThreadId,
    /// Kernel thread id; 0 when unknown
    pub tid: i64,
    /// Needed to signal the thread for stack sampling
    #[cfg(target_os = "linux")]
    pub pthread: libc::pthread_t,
    /// `[low, high)` of the thread's stack; zero when unknown
    pub stack_low: usize,
    pub stack_high: usize,
}

impl MonitoredThread {
    /// Describe the calling thread.
    #[must_use]
    pub fn current() -> Self {
        let (stack_low, stack_high) = current_stack_bounds().unwrap_or((0, 0));
        // SAFETY: pthread_self has no preconditions
        #[cfg(target_os = "linux")]
        let pthread = unsafe { libc::pthread_self() };
        Self {
            id: std::thread::current().id(),
            tid: current_tid(),
            #[cfg(target_os = "linux")]
            pthread,
            stack_low,
            stack_high,
        }
    }
}

#[cfg(target_os = "linux")]
fn current_stack_bounds() -> Option<(usize, usize)> {
    // SAFETY: attr is initialized by pthread_getattr_np before use and
    // destroyed exactly once afterwards.
    unsafe {
        let mut attr: libc::pthread_attr_t = std::mem::zeroed();
        if libc::pthread_getattr_np(libc::pthread_self(), &mut attr) != 0 {
            return None;
        }
        let mut addr: *mut libc::c_void = std::ptr::null_mut();
        let mut size: libc::size_t = 0;
        let rc = libc::pthread_attr_getstack(&attr, &mut addr, &mut size);
        libc::pthread_attr_destroy(&mut attr);
        if rc != 0 || addr.is_null() {
            return None;
        }
        let low = addr as usize;
        Some((low, low + size))
    }
}

#[cfg(target_os = "linux")]
fn current_tid() -> i64 {
    // SAFETY: gettid takes no arguments and cannot fail
    i64::from(unsafe { libc::syscall(libc::SYS_gettid) })
}

#[cfg(not(target_os = "linux"))]
fn current_tid() -> i64 {
    0
}

#[cfg(not(target_os = "linux"))]
fn current_stack_bounds() -> Option<(usize, usize)> {
    None
}

/// What the engine needs from the host's serial executor.
pub trait HostLooper: Send + Sync {
    /// Install (or with `None`, detach) the marker hook.
    fn set_marker_hook(&self, hook: Option<MarkerHook>);

    /// The monitored thread, once it is running.
    fn monitored_thread(&self) -> Option<MonitoredThread>;

    fn is_monitored_thread(&self) -> bool {
        self.monitored_thread()
            .is_some_and(|t| t.id == std::thread::current().id())
    }

    /// Run `task` on the monitored thread after `delay`.
    ///
    /// `label` is the content the host reports in the task's markers.
    fn post_delayed(&self, label: &str, delay: Duration, task: HostTask) -> TaskToken;

    /// Remove a pending task. A task that already ran or is unknown is ignored.
    fn remove(&self, token: TaskToken);
}
