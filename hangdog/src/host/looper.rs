//! Reference serial executor
//!
//! A minimal message loop: tasks run one at a time on the thread that calls
//! [`Looper::run`], in deadline order. Around every task the installed marker
//! hook receives `">>>>> Dispatching to <label>"` and
//! `"<<<<< Finished to <label>"`, which is all the engine needs to watch it.

use crossbeam_channel::bounded;
use hangdog_common::{DISPATCH_PREFIX, FINISH_PREFIX};
use log::warn;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{HostLooper, HostTask, MarkerHook, MonitoredThread};
use crate::domain::{HangdogError, TaskToken};
use crate::scheduling::{spawn_named, DelayQueue};

struct Entry {
    label: String,
    task: HostTask,
}

struct LooperState {
    queue: DelayQueue<Entry>,
    quitting: bool,
}

struct Shared {
    state: Mutex<LooperState>,
    wake: Condvar,
    hook: RwLock<Option<MarkerHook>>,
    thread: OnceLock<MonitoredThread>,
    next_token: AtomicU64,
}

/// Handle to a serial task queue. Clones share the queue.
#[derive(Clone)]
pub struct Looper {
    shared: Arc<Shared>,
}

impl Looper {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LooperState { queue: DelayQueue::new(), quitting: false }),
                wake: Condvar::new(),
                hook: RwLock::new(None),
                thread: OnceLock::new(),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// Start a looper on a new thread and wait until it is running.
    ///
    /// # Errors
    /// Returns [`HangdogError::ThreadSpawn`] if the thread cannot start.
    pub fn spawn(name: &str) -> Result<(Self, JoinHandle<()>), HangdogError> {
        let looper = Self::new();
        let (ready_tx, ready_rx) = bounded(1);
        let runner = looper.clone();
        let handle = spawn_named(name, move || {
            runner.bind_current_thread();
            let _ = ready_tx.send(());
            runner.run();
        })?;
        // the thread binds before anything else, so this only fails if it died
        let _ = ready_rx.recv();
        Ok((looper, handle))
    }

    /// Queue `task` to run as soon as possible.
    pub fn post(&self, label: &str, task: impl FnOnce() + Send + 'static) -> TaskToken {
        self.enqueue(label, Duration::ZERO, Box::new(task))
    }

    fn enqueue(&self, label: &str, delay: Duration, task: HostTask) -> TaskToken {
        let token = self.shared.next_token.fetch_add(1, Ordering::Relaxed);
        let entry = Entry { label: label.to_string(), task };
        {
            let mut state = self.shared.state.lock();
            if state.quitting {
                return TaskToken::NONE;
            }
            state.queue.insert(token, Instant::now() + delay, entry);
        }
        self.shared.wake.notify_one();
        TaskToken(token)
    }

    fn bind_current_thread(&self) -> bool {
        let me = MonitoredThread::current();
        self.shared.thread.set(me).is_ok() || self.shared.thread.get().is_some_and(|t| t.id == me.id)
    }

    /// Run tasks on the calling thread until [`Looper::quit`].
    ///
    /// The calling thread becomes the monitored thread. A looper runs on one
    /// thread only; calling this from a second thread returns immediately.
    pub fn run(&self) {
        if !self.bind_current_thread() {
            warn!("Looper is already bound to another thread");
            return;
        }

        while let Some(entry) = self.next_entry() {
            self.dispatch(entry);
        }
    }

    fn next_entry(&self) -> Option<Entry> {
        let mut state = self.shared.state.lock();
        loop {
            if state.quitting {
                return None;
            }
            if let Some((_, entry)) = state.queue.pop_due(Instant::now()) {
                return Some(entry);
            }
            match state.queue.next_deadline() {
                Some(deadline) => {
                    self.shared.wake.wait_until(&mut state, deadline);
                }
                None => self.shared.wake.wait(&mut state),
            }
        }
    }

    fn dispatch(&self, entry: Entry) {
        let hook = self.shared.hook.read().clone();
        if let Some(hook) = &hook {
            hook(&format!("{DISPATCH_PREFIX}{}", entry.label));
        }
        (entry.task)();
        if let Some(hook) = &hook {
            hook(&format!("{FINISH_PREFIX}{}", entry.label));
        }
    }

    /// Stop the loop after the current task. Pending tasks are dropped.
    pub fn quit(&self) {
        {
            let mut state = self.shared.state.lock();
            state.quitting = true;
            state.queue.clear();
        }
        self.shared.wake.notify_all();
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}

impl Default for Looper {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLooper for Looper {
    fn set_marker_hook(&self, hook: Option<MarkerHook>) {
        *self.shared.hook.write() = hook;
    }

    fn monitored_thread(&self) -> Option<MonitoredThread> {
        self.shared.thread.get().copied()
    }

    fn post_delayed(&self, label: &str, delay: Duration, task: HostTask) -> TaskToken {
        self.enqueue(label, delay, task)
    }

    fn remove(&self, token: TaskToken) {
        if token.is_none() {
            return;
        }
        self.shared.state.lock().queue.remove(token.0);
    }
}
