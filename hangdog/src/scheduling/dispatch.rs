//! Elastic pool delivering diagnostic events to host code
//!
//! One core worker waits on a zero-capacity channel. A job is handed to it
//! directly if it is idle; otherwise a short-lived extra worker is spawned for
//! that job alone. Nothing queues, so a slow listener never delays the next
//! event. A core worker killed by a panicking job is respawned on the next
//! hand-off.

use crossbeam_channel::{bounded, Sender, TrySendError};
use log::warn;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::spawn_named;
use crate::domain::HangdogError;

pub type DispatchJob = Box<dyn FnOnce() + Send>;

const WORKER_NAME: &str = "hangdog-event";

pub struct DispatchPool {
    handoff: Mutex<Option<Sender<DispatchJob>>>,
    extra_workers: AtomicUsize,
}

impl DispatchPool {
    /// Start the pool with its core worker.
    ///
    /// # Errors
    /// Returns [`HangdogError::ThreadSpawn`] if the core worker cannot start.
    pub fn start() -> Result<Self, HangdogError> {
        Ok(Self { handoff: Mutex::new(Some(spawn_core()?)), extra_workers: AtomicUsize::new(0) })
    }

    /// Run `job` off the caller's thread. Returns false once shut down.
    pub fn execute(&self, job: DispatchJob) -> bool {
        let mut guard = self.handoff.lock();
        let Some(handoff) = guard.as_ref() else {
            warn!("Dispatch pool is shut down, event dropped");
            return false;
        };

        let job = match handoff.try_send(job) {
            Ok(()) => return true,
            Err(TrySendError::Full(job)) => job,
            Err(TrySendError::Disconnected(job)) => {
                // the core worker died in a job; this one goes to an extra worker
                match spawn_core() {
                    Ok(core) => *guard = Some(core),
                    Err(e) => warn!("Failed to respawn dispatch core worker: {e}"),
                }
                job
            }
        };
        drop(guard);

        let n = self.extra_workers.fetch_add(1, Ordering::Relaxed) + 1;
        match spawn_named(&format!("{WORKER_NAME}-{n}"), job) {
            Ok(_) => true,
            Err(e) => {
                warn!("{e}; event dropped");
                false
            }
        }
    }

    /// Stop accepting jobs. Jobs already running finish on their own.
    pub fn shutdown(&self) {
        self.handoff.lock().take();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.handoff.lock().is_none()
    }
}

fn spawn_core() -> Result<Sender<DispatchJob>, HangdogError> {
    let (tx, rx) = bounded::<DispatchJob>(0);
    spawn_named(WORKER_NAME, move || {
        while let Ok(job) = rx.recv() {
            job();
        }
    })?;
    Ok(tx)
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_off_caller_thread() {
        let pool = DispatchPool::start().unwrap();
        let (tx, rx) = mpsc::channel();
        let caller = std::thread::current().id();

        assert!(pool.execute(Box::new(move || {
            tx.send(std::thread::current().id()).unwrap();
        })));
        let worker = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_ne!(worker, caller);
    }

    #[test]
    fn test_busy_worker_spawns_extra() {
        let pool = DispatchPool::start().unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel();

        // occupy whichever worker takes the first job until released
        let blocked_done = done_tx.clone();
        pool.execute(Box::new(move || {
            let _ = release_rx.recv();
            blocked_done.send("blocked").unwrap();
        }));
        pool.execute(Box::new(move || done_tx.send("second").unwrap()));

        // the second job completes while the first is still blocked
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "second");
        release_tx.send(()).unwrap();
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "blocked");
    }

    #[test]
    fn test_panicking_job_does_not_stop_delivery() {
        let pool = DispatchPool::start().unwrap();
        // let the core worker reach recv so the panicking job lands on it
        std::thread::sleep(Duration::from_millis(100));
        assert!(pool.execute(Box::new(|| panic!("listener failed"))));
        std::thread::sleep(Duration::from_millis(100));

        for round in 0..3 {
            let (tx, rx) = mpsc::channel();
            assert!(pool.execute(Box::new(move || tx.send(round).unwrap())));
            assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), round);
        }
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let pool = DispatchPool::start().unwrap();
        pool.shutdown();
        assert!(pool.is_shutdown());
        assert!(!pool.execute(Box::new(|| {})));
    }
}
