//! Dedicated timer thread
//!
//! Owns a [`DelayQueue`] of boxed jobs and runs each on the timer thread when
//! its deadline passes. Scheduling and cancellation are message sends, so no
//! caller ever waits on the timer thread. Each engine component has its own
//! timer, so a slow capture cannot delay the hang detonator.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::delay_queue::DelayQueue;
use super::spawn_named;
use crate::domain::{HangdogError, TimerToken};

pub type TimerJob = Box<dyn FnOnce() + Send>;

enum Command {
    Schedule { token: u64, deadline: Instant, job: TimerJob },
    Cancel(u64),
    Shutdown,
}

pub struct TimerThread {
    name: String,
    commands: Sender<Command>,
    next_token: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerThread {
    /// Spawn the timer thread.
    ///
    /// # Errors
    /// Returns [`HangdogError::ThreadSpawn`] if the OS refuses the thread.
    pub fn spawn(name: &str) -> Result<Self, HangdogError> {
        let (commands, rx) = unbounded();
        let handle = spawn_named(name, move || run(&rx))?;
        Ok(Self {
            name: name.to_string(),
            commands,
            next_token: AtomicU64::new(1),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Run `job` after `delay`. The returned token cancels it.
    pub fn schedule(&self, delay: Duration, job: TimerJob) -> TimerToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + delay;
        if self.commands.send(Command::Schedule { token, deadline, job }).is_err() {
            debug!("{} is shut down, dropped timer {token}", self.name);
        }
        TimerToken(token)
    }

    /// Best-effort cancel; a job that already ran is not affected.
    pub fn cancel(&self, token: TimerToken) {
        if token.is_none() {
            return;
        }
        let _ = self.commands.send(Command::Cancel(token.0));
    }

    /// Stop the thread and wait for it. Pending jobs are dropped unrun.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.handle.lock().take() {
            // a job may shut down its own timer
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(rx: &Receiver<Command>) {
    let mut queue: DelayQueue<TimerJob> = DelayQueue::new();

    loop {
        while let Some((_, job)) = queue.pop_due(Instant::now()) {
            job();
        }

        let command = match queue.next_deadline() {
            Some(deadline) => match rx.recv_deadline(deadline) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            Command::Schedule { token, deadline, job } => queue.insert(token, deadline, job),
            Command::Cancel(token) => {
                queue.remove(token);
            }
            Command::Shutdown => break,
        }
    }
}
