//! Hang detection by timer race
//!
//! Every task start arms a race between two delayed jobs, unless one is
//! already outstanding:
//!
//! ```text
//!   t=0            t=defuse_delay                 t=bomb_delay
//!   arm ─────────────── defuser (monitored thread) ── detonator (watchdog thread)
//! ```
//!
//! The defuser runs on the monitored thread, so it only runs if that thread
//! is alive; the detonator runs on the `hangdog-watchdog` timer thread, which
//! the monitored thread cannot block. Whichever swaps the race slot from its
//! race id back to 0 wins; the loser's cancellation is cleanup only.
//!
//! The race slot holds the id of the outstanding race rather than a flag, so
//! a late job from an earlier race can never resolve a newer one.

use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;
use std::time::Duration;

use crate::domain::{HangdogError, PipelineIdentity, TaskToken, TimerToken};
use crate::host::{ForegroundProbe, HostLooper};
use crate::sampling::{SamplingModel, SamplingRecord};
use crate::scheduling::TimerThread;
use crate::stack::StackCapturer;

/// Label of the defuser task on the host looper; the race id follows
pub const DEFUSER_LABEL_PREFIX: &str = "hangdog::defuser#";

const THREAD_NAME: &str = "hangdog-watchdog";

/// Evidence gathered when the detonator wins
#[derive(Debug, Clone, Serialize)]
pub struct HangReport {
    pub stack: String,
    pub current: Option<SamplingRecord>,
    pub history: Vec<SamplingRecord>,
}

pub trait HangListener: Send + Sync {
    fn on_hang_detected(&self, report: HangReport);
}

#[derive(Debug, Clone, Copy)]
pub struct RaceSettings {
    pub foreground_threshold: Duration,
    pub background_threshold: Duration,
    /// Floor of the bomb delay and gap between defuser and detonator
    pub min_race_interval: Duration,
}

impl RaceSettings {
    /// `(bomb_delay, defuse_delay)` for a hang threshold
    #[must_use]
    pub fn delays(&self, threshold: Duration) -> (Duration, Duration) {
        let bomb = threshold.max(self.min_race_interval);
        (bomb, bomb - self.min_race_interval)
    }
}

/// Collaborators the watchdog reads from when a race resolves
pub struct WatchdogParts {
    pub host: Arc<dyn HostLooper>,
    pub model: Arc<SamplingModel>,
    pub capturer: Arc<dyn StackCapturer>,
    pub foreground: Arc<dyn ForegroundProbe>,
    pub identity: Arc<PipelineIdentity>,
    pub listener: Weak<dyn HangListener>,
}

pub struct Watchdog {
    inner: Arc<Inner>,
}

struct Inner {
    timer: TimerThread,
    parts: WatchdogParts,
    settings: RaceSettings,
    race: AtomicU64,
    next_race: AtomicU64,
    detonator: AtomicU64,
    defuser: AtomicU64,
    defuser_label: Mutex<String>,
}

impl Watchdog {
    /// # Errors
    /// Returns [`HangdogError::ThreadSpawn`] if the watchdog thread cannot start.
    pub fn spawn(settings: RaceSettings, parts: WatchdogParts) -> Result<Self, HangdogError> {
        Ok(Self {
            inner: Arc::new(Inner {
                timer: TimerThread::spawn(THREAD_NAME)?,
                parts,
                settings,
                race: AtomicU64::new(0),
                next_race: AtomicU64::new(1),
                detonator: AtomicU64::new(0),
                defuser: AtomicU64::new(0),
                defuser_label: Mutex::new(String::new()),
            }),
        })
    }

    /// Arm a race for a task that just started on the monitored thread.
    pub fn arm(&self, record: &SamplingRecord, caller: ThreadId) {
        let inner = &self.inner;
        if !inner.parts.identity.is(caller) {
            return;
        }
        if inner.race.load(Ordering::Acquire) != 0 {
            return;
        }
        if record.content() == inner.defuser_label.lock().as_str() {
            return;
        }

        let threshold = if inner.parts.foreground.is_foreground() {
            inner.settings.foreground_threshold
        } else {
            inner.settings.background_threshold
        };
        let (bomb_delay, defuse_delay) = inner.settings.delays(threshold);

        let id = inner.next_race.fetch_add(1, Ordering::Relaxed);
        if inner.race.compare_exchange(0, id, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return;
        }
        let label = format!("{DEFUSER_LABEL_PREFIX}{id}");
        inner.defuser_label.lock().clone_from(&label);

        let weak = Arc::downgrade(inner);
        let detonator = inner.timer.schedule(
            bomb_delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.detonate(id);
                }
            }),
        );
        inner.detonator.store(detonator.0, Ordering::Release);

        let weak = Arc::downgrade(inner);
        let defuser = inner.parts.host.post_delayed(
            &label,
            defuse_delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.defuse(id);
                }
            }),
        );
        inner.defuser.store(defuser.0, Ordering::Release);

        debug!(
            "Armed race {id} for {:?}: defuse in {defuse_delay:?}, detonate in {bomb_delay:?}",
            record.content()
        );
    }

    /// True while a race is outstanding
    #[must_use]
    pub fn in_race(&self) -> bool {
        self.inner.race.load(Ordering::Acquire) != 0
    }

    /// Label of the most recently posted defuser task
    #[must_use]
    pub fn defuser_label(&self) -> String {
        self.inner.defuser_label.lock().clone()
    }

    /// Abandon any outstanding race without reporting.
    pub fn disarm(&self) {
        let inner = &self.inner;
        let id = inner.race.load(Ordering::Acquire);
        if id != 0 && inner.race.compare_exchange(id, 0, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            inner.timer.cancel(TimerToken(inner.detonator.swap(0, Ordering::AcqRel)));
            inner.parts.host.remove(TaskToken(inner.defuser.swap(0, Ordering::AcqRel)));
            debug!("Disarmed race {id}");
        }
    }

    pub fn shutdown(&self) {
        self.disarm();
        self.inner.timer.shutdown();
    }
}

impl Inner {
    /// Runs on the monitored thread
    fn defuse(&self, id: u64) {
        if self.race.compare_exchange(id, 0, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return;
        }
        self.defuser.store(0, Ordering::Release);
        self.timer.cancel(TimerToken(self.detonator.swap(0, Ordering::AcqRel)));
        debug!("Race {id} defused");
    }

    /// Runs on the watchdog thread
    fn detonate(&self, id: u64) {
        if self.race.compare_exchange(id, 0, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return;
        }
        self.detonator.store(0, Ordering::Release);
        self.parts.host.remove(TaskToken(self.defuser.swap(0, Ordering::AcqRel)));
        info!("Race {id} detonated, monitored thread is blocked");

        let model = &self.parts.model;
        let stack = match self.parts.capturer.capture() {
            Ok(stack) => {
                model.attach_stack(stack.clone(), false);
                stack
            }
            Err(e) => {
                debug!("Stack capture at detonation failed: {e}");
                model
                    .current_record()
                    .and_then(|r| r.stack().map(str::to_string))
                    .unwrap_or_default()
            }
        };

        let report =
            HangReport { stack, current: model.current_record(), history: model.history_snapshot() };
        if let Some(listener) = self.parts.listener.upgrade() {
            listener.on_hang_detected(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CaptureError, Timestamp};
    use crate::host::{Looper, Visibility};
    use crate::sampling::TaskRecord;
    use crate::stack::FnCapturer;
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use hangdog_common::DISPATCH_PREFIX;
    use std::thread::JoinHandle;

    struct Reports(Mutex<Sender<HangReport>>);

    impl HangListener for Reports {
        fn on_hang_detected(&self, report: HangReport) {
            let _ = self.0.lock().send(report);
        }
    }

    struct Rig {
        watchdog: Watchdog,
        model: Arc<SamplingModel>,
        looper: Looper,
        looper_thread: Option<JoinHandle<()>>,
        visibility: Arc<Visibility>,
        reports: Receiver<HangReport>,
        _listener: Arc<dyn HangListener>,
        me: ThreadId,
    }

    impl Rig {
        /// Foreground threshold 300ms, background 600ms, min interval 100ms
        fn new() -> Self {
            let identity = Arc::new(PipelineIdentity::default());
            let me = std::thread::current().id();
            identity.bind(me);
            let model = Arc::new(SamplingModel::new(10, identity.clone()));
            let (looper, looper_thread) = Looper::spawn("test-monitored").unwrap();
            let visibility = Arc::new(Visibility::default());
            let (tx, reports) = unbounded();
            let listener: Arc<dyn HangListener> = Arc::new(Reports(Mutex::new(tx)));

            let watchdog = Watchdog::spawn(
                RaceSettings {
                    foreground_threshold: Duration::from_millis(300),
                    background_threshold: Duration::from_millis(600),
                    min_race_interval: Duration::from_millis(100),
                },
                WatchdogParts {
                    host: Arc::new(looper.clone()),
                    model: model.clone(),
                    capturer: Arc::new(FnCapturer(|| Ok::<_, CaptureError>("#0 stalled".to_string()))),
                    foreground: visibility.clone(),
                    identity,
                    listener: Arc::downgrade(&listener),
                },
            )
            .unwrap();

            Self {
                watchdog,
                model,
                looper,
                looper_thread: Some(looper_thread),
                visibility,
                reports,
                _listener: listener,
                me,
            }
        }

        fn start(&self, content: &str) -> SamplingRecord {
            let task = TaskRecord::new(&format!("{DISPATCH_PREFIX}{content}"), Timestamp(0));
            self.model.handle_task_event(&task, self.me).unwrap()
        }

        fn stall_looper(&self, how_long: Duration) {
            self.looper.post("stall", move || std::thread::sleep(how_long));
        }
    }

    impl Drop for Rig {
        fn drop(&mut self) {
            self.watchdog.shutdown();
            self.looper.quit();
            if let Some(handle) = self.looper_thread.take() {
                let _ = handle.join();
            }
        }
    }

    #[test]
    fn test_delays() {
        let settings = RaceSettings {
            foreground_threshold: Duration::from_millis(4000),
            background_threshold: Duration::from_millis(8000),
            min_race_interval: Duration::from_millis(500),
        };
        assert_eq!(
            settings.delays(Duration::from_millis(4000)),
            (Duration::from_millis(4000), Duration::from_millis(3500))
        );
        // floor applies to tiny thresholds
        assert_eq!(settings.delays(Duration::from_millis(100)), (Duration::from_millis(500), Duration::ZERO));
    }

    #[test]
    fn test_live_thread_defuses() {
        let rig = Rig::new();
        let record = rig.start("A");
        rig.watchdog.arm(&record, rig.me);
        assert!(rig.watchdog.in_race());

        assert!(rig.reports.recv_timeout(Duration::from_millis(600)).is_err());
        assert!(!rig.watchdog.in_race());
    }

    #[test]
    fn test_stall_longer_than_bomb_delay_reports_once() {
        let rig = Rig::new();
        rig.stall_looper(Duration::from_millis(700));
        let record = rig.start("B");
        rig.watchdog.arm(&record, rig.me);

        let report = rig.reports.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(report.stack, "#0 stalled");
        let current = report.current.unwrap();
        assert_eq!(current.content(), "B");
        assert!(!current.is_complete());
        assert_eq!(current.stack(), Some("#0 stalled"));
        assert_eq!(report.history.len(), 1);

        assert!(rig.reports.recv_timeout(Duration::from_millis(800)).is_err());
        assert!(!rig.watchdog.in_race());
    }

    #[test]
    fn test_stall_shorter_than_bomb_delay_reports_nothing() {
        let rig = Rig::new();
        rig.stall_looper(Duration::from_millis(120));
        let record = rig.start("short");
        rig.watchdog.arm(&record, rig.me);
        assert!(rig.reports.recv_timeout(Duration::from_millis(700)).is_err());
    }

    #[test]
    fn test_no_rearm_while_in_race() {
        let rig = Rig::new();
        rig.stall_looper(Duration::from_millis(700));
        for name in ["one", "two", "three"] {
            let record = rig.start(name);
            rig.watchdog.arm(&record, rig.me);
        }
        let label = rig.watchdog.defuser_label();
        assert_eq!(label, format!("{DEFUSER_LABEL_PREFIX}1"));

        assert!(rig.reports.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(rig.reports.recv_timeout(Duration::from_millis(800)).is_err());
    }

    #[test]
    fn test_defuser_task_does_not_arm() {
        let rig = Rig::new();
        let record = rig.start("A");
        rig.watchdog.arm(&record, rig.me);
        std::thread::sleep(Duration::from_millis(400));
        assert!(!rig.watchdog.in_race());

        let defuser_record = rig.start(&rig.watchdog.defuser_label());
        rig.watchdog.arm(&defuser_record, rig.me);
        assert!(!rig.watchdog.in_race());
    }

    #[test]
    fn test_background_threshold() {
        let rig = Rig::new();
        rig.visibility.set_foreground(false);
        rig.stall_looper(Duration::from_millis(900));
        let record = rig.start("bg");
        rig.watchdog.arm(&record, rig.me);

        // foreground bomb would have gone off at 300ms
        assert!(rig.reports.recv_timeout(Duration::from_millis(450)).is_err());
        assert!(rig.reports.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_foreign_caller_and_disarm() {
        let rig = Rig::new();
        let record = rig.start("A");
        let other = std::thread::spawn(|| std::thread::current().id()).join().unwrap();
        rig.watchdog.arm(&record, other);
        assert!(!rig.watchdog.in_race());

        rig.stall_looper(Duration::from_millis(500));
        rig.watchdog.arm(&record, rig.me);
        rig.watchdog.disarm();
        assert!(!rig.watchdog.in_race());
        assert!(rig.reports.recv_timeout(Duration::from_millis(600)).is_err());
    }
}
