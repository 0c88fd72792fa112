//! Speculative stack capture
//!
//! Every task start schedules a snapshot of the monitored thread at 80% of the
//! slow-task threshold; every task end cancels it. A task that turns out slow,
//! or hangs, therefore already has a stack by the time anyone reports it.
//!
//! The snapshot lands on whatever record is current when the timer fires,
//! which may be newer than the task that scheduled it.
//!
//! The capturer is prepared on the capture thread at spawn, so symbol loading
//! never delays the first report.

use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use super::model::SamplingModel;
use crate::domain::{HangdogError, PipelineIdentity, TimerToken};
use crate::scheduling::TimerThread;
use crate::stack::StackCapturer;

/// Fraction of the slow-task threshold after which the stack is taken
pub const CAPTURE_FACTOR: f64 = 0.8;

const THREAD_NAME: &str = "hangdog-stack-capture";

pub struct StackCaptureWorker {
    timer: TimerThread,
    identity: Arc<PipelineIdentity>,
    model: Arc<SamplingModel>,
    capturer: Arc<dyn StackCapturer>,
    delay: Duration,
    pending: AtomicU64,
}

impl StackCaptureWorker {
    /// # Errors
    /// Returns [`HangdogError::ThreadSpawn`] if the timer thread cannot start.
    pub fn spawn(
        slow_task_threshold: Duration,
        model: Arc<SamplingModel>,
        capturer: Arc<dyn StackCapturer>,
        identity: Arc<PipelineIdentity>,
    ) -> Result<Self, HangdogError> {
        let timer = TimerThread::spawn(THREAD_NAME)?;
        let warm = Arc::clone(&capturer);
        timer.schedule(Duration::ZERO, Box::new(move || warm.prepare()));
        Ok(Self {
            timer,
            identity,
            model,
            capturer,
            delay: slow_task_threshold.mul_f64(CAPTURE_FACTOR),
            pending: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn capture_delay(&self) -> Duration {
        self.delay
    }

    /// Replace any pending capture with one `capture_delay` from now.
    pub fn schedule_capture(&self, caller: ThreadId) {
        if !self.identity.is(caller) {
            return;
        }
        self.timer.cancel(TimerToken(self.pending.swap(0, Ordering::AcqRel)));

        let model = Arc::clone(&self.model);
        let capturer = Arc::clone(&self.capturer);
        let token = self.timer.schedule(
            self.delay,
            Box::new(move || match capturer.capture() {
                Ok(stack) => {
                    model.attach_stack(stack, true);
                }
                Err(e) => debug!("Speculative stack capture failed: {e}"),
            }),
        );
        self.pending.store(token.0, Ordering::Release);
    }

    pub fn cancel_capture(&self, caller: ThreadId) {
        if !self.identity.is(caller) {
            return;
        }
        self.timer.cancel(TimerToken(self.pending.swap(0, Ordering::AcqRel)));
    }

    pub fn shutdown(&self) {
        self.timer.shutdown();
    }
}
