//! Foreground/background state of the host
//!
//! The watchdog picks its hang threshold from this; a backgrounded app is
//! allowed to be slower before a hang is reported.

use std::sync::atomic::{AtomicBool, Ordering};

pub trait ForegroundProbe: Send + Sync {
    fn is_foreground(&self) -> bool;
}

impl<F> ForegroundProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_foreground(&self) -> bool {
        self()
    }
}

/// Flag the host flips on visibility changes. Foreground by default.
#[derive(Debug)]
pub struct Visibility(AtomicBool);

impl Visibility {
    #[must_use]
    pub fn new(foreground: bool) -> Self {
        Self(AtomicBool::new(foreground))
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.0.store(foreground, Ordering::Release);
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ForegroundProbe for Visibility {
    fn is_foreground(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
