//! Sampling pipeline thread
//!
//! Producers on the monitored thread push raw markers into an unbounded
//! channel; the `hangdog-sampling` thread drains it, feeds the model and
//! notifies the listener synchronously for every record the model returns.
//!
//! ## Idle policy
//!
//! After the last handled marker the thread keeps polling with
//! `yield_now` for [`IDLE_SPIN`], absorbing back-to-back tasks without a
//! wake-up, then blocks in `recv()` until the next send.
//!
//! ## Record recycling
//!
//! Handled [`TaskRecord`]s go back to producers over a small bounded channel
//! so marker strings reuse their buffers. A full return channel just drops
//! the record.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use log::debug;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use super::model::SamplingModel;
use super::record::{SamplingRecord, TaskRecord};
use crate::clock::Clock;
use crate::domain::{HangdogError, PipelineIdentity};
use crate::host::HostLooper;
use crate::scheduling::spawn_named;

/// How long the pipeline polls before blocking
pub const IDLE_SPIN: Duration = Duration::from_millis(10);

/// Recycled task records kept around
pub const RECORD_POOL_SIZE: usize = 5;
pub const LOW_MEMORY_RECORD_POOL_SIZE: usize = 2;

const THREAD_NAME: &str = "hangdog-sampling";

/// Receives every record the model produced, on the pipeline thread.
pub trait SamplingListener: Send + Sync {
    fn on_sampling(&self, record: &SamplingRecord, caller: ThreadId);
}

enum Message {
    Task(TaskRecord),
    Shutdown,
}

pub struct SamplingPipeline {
    sender: Sender<Message>,
    recycled: Receiver<TaskRecord>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SamplingPipeline {
    /// Spawn the pipeline thread. It binds `identity` before anything else.
    ///
    /// # Errors
    /// Returns [`HangdogError::ThreadSpawn`] if the thread cannot start.
    pub fn spawn(
        model: Arc<SamplingModel>,
        identity: Arc<PipelineIdentity>,
        listener: Weak<dyn SamplingListener>,
        pool_size: usize,
    ) -> Result<Self, HangdogError> {
        let (sender, rx) = unbounded();
        let (recycle_tx, recycled) = bounded(pool_size.max(1));

        let handle = spawn_named(THREAD_NAME, move || {
            let me = std::thread::current().id();
            identity.bind(me);
            run(&rx, &recycle_tx, &model, &listener, me);
        })?;

        Ok(Self { sender, recycled, handle: Mutex::new(Some(handle)) })
    }

    /// Producer handle for the host side.
    #[must_use]
    pub fn producer(&self, host: Arc<dyn HostLooper>, clock: Clock) -> MarkerProducer {
        MarkerProducer {
            sender: self.sender.clone(),
            recycled: self.recycled.clone(),
            host,
            clock,
        }
    }

    /// Drop every recycled task record. Returns how many were released.
    pub fn release_records(&self) -> usize {
        self.recycled.try_iter().count()
    }

    /// Stop the thread and wait for it. Markers still queued are dropped.
    pub fn shutdown(&self) {
        let _ = self.sender.send(Message::Shutdown);
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for SamplingPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    rx: &Receiver<Message>,
    recycle: &Sender<TaskRecord>,
    model: &SamplingModel,
    listener: &Weak<dyn SamplingListener>,
    me: ThreadId,
) {
    let mut last_handled = Instant::now();

    loop {
        let message = match rx.try_recv() {
            Ok(message) => message,
            Err(TryRecvError::Empty) if last_handled.elapsed() < IDLE_SPIN => {
                std::thread::yield_now();
                continue;
            }
            Err(TryRecvError::Empty) => match rx.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
            Err(TryRecvError::Disconnected) => break,
        };

        let task = match message {
            Message::Task(task) => task,
            Message::Shutdown => break,
        };

        if let Some(record) = model.handle_task_event(&task, me) {
            if let Some(listener) = listener.upgrade() {
                listener.on_sampling(&record, me);
            }
        }
        let _ = recycle.try_send(task);
        last_handled = Instant::now();
    }
    debug!("Sampling pipeline stopped");
}

/// Host-side entry point of the pipeline.
///
/// Markers from any thread other than the monitored one are dropped here,
/// before they reach the queue.
#[derive(Clone)]
pub struct MarkerProducer {
    sender: Sender<Message>,
    recycled: Receiver<TaskRecord>,
    host: Arc<dyn HostLooper>,
    clock: Clock,
}

impl MarkerProducer {
    pub fn dispatch(&self, marker: &str) {
        if !self.host.is_monitored_thread() {
            return;
        }
        let now = self.clock.now();
        let task = match self.recycled.try_recv() {
            Ok(mut task) => {
                task.reset(marker, now);
                task
            }
            Err(_) => TaskRecord::new(marker, now),
        };
        // after shutdown the marker is simply lost
        let _ = self.sender.send(Message::Task(task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskToken;
    use crate::host::{HostTask, MarkerHook, MonitoredThread};
    use crate::sampling::record::SamplingStatus;
    use hangdog_common::{DISPATCH_PREFIX, FINISH_PREFIX};

    /// Host whose monitored thread is whoever created it.
    struct ThisThread(MonitoredThread);

    impl HostLooper for ThisThread {
        fn set_marker_hook(&self, _hook: Option<MarkerHook>) {}

        fn monitored_thread(&self) -> Option<MonitoredThread> {
            Some(self.0)
        }

        fn post_delayed(&self, _label: &str, _delay: Duration, _task: HostTask) -> TaskToken {
            TaskToken::NONE
        }

        fn remove(&self, _token: TaskToken) {}
    }

    struct Recorder {
        tx: Mutex<crossbeam_channel::Sender<(SamplingRecord, ThreadId)>>,
    }

    impl SamplingListener for Recorder {
        fn on_sampling(&self, record: &SamplingRecord, caller: ThreadId) {
            let _ = self.tx.lock().send((record.clone(), caller));
        }
    }

    fn pipeline() -> (
        SamplingPipeline,
        Arc<PipelineIdentity>,
        Arc<Recorder>,
        Receiver<(SamplingRecord, ThreadId)>,
    ) {
        let identity = Arc::new(PipelineIdentity::default());
        let model = Arc::new(SamplingModel::new(8, identity.clone()));
        let (tx, rx) = unbounded();
        let recorder = Arc::new(Recorder { tx: Mutex::new(tx) });
        let as_listener: Arc<dyn SamplingListener> = recorder.clone();
        let pipeline =
            SamplingPipeline::spawn(model, identity.clone(), Arc::downgrade(&as_listener), 2).unwrap();
        (pipeline, identity, recorder, rx)
    }

    #[test]
    fn test_markers_reach_listener_from_pipeline_thread() {
        let (pipeline, identity, _recorder, rx) = pipeline();
        let producer = pipeline.producer(Arc::new(ThisThread(MonitoredThread::current())), Clock::new());

        producer.dispatch(&format!("{DISPATCH_PREFIX}A"));
        producer.dispatch(&format!("{FINISH_PREFIX}A"));

        let (started, caller) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(started.status(), SamplingStatus::Started);
        assert_eq!(started.content(), "A");
        assert!(identity.is(caller));
        assert_ne!(caller, std::thread::current().id());

        let (finished, _) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(finished.status(), SamplingStatus::Finished);
        pipeline.shutdown();
    }

    #[test]
    fn test_markers_from_other_threads_are_dropped() {
        let (pipeline, _identity, _recorder, rx) = pipeline();
        let host: Arc<dyn HostLooper> = Arc::new(ThisThread(MonitoredThread::current()));
        let producer = pipeline.producer(host, Clock::new());

        std::thread::spawn(move || producer.dispatch(&format!("{DISPATCH_PREFIX}foreign")))
            .join()
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        pipeline.shutdown();
    }

    #[test]
    fn test_wakes_up_after_idle() {
        let (pipeline, _identity, _recorder, rx) = pipeline();
        let producer = pipeline.producer(Arc::new(ThisThread(MonitoredThread::current())), Clock::new());

        // well past the spin window, the thread is blocked in recv
        std::thread::sleep(IDLE_SPIN * 5);
        producer.dispatch(&format!("{DISPATCH_PREFIX}late"));
        let (record, _) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(record.content(), "late");
        pipeline.shutdown();
    }

    #[test]
    fn test_release_records_empties_pool() {
        let (pipeline, _identity, _recorder, rx) = pipeline();
        let producer = pipeline.producer(Arc::new(ThisThread(MonitoredThread::current())), Clock::new());

        producer.dispatch(&format!("{DISPATCH_PREFIX}A"));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(pipeline.release_records(), 1);
        assert_eq!(pipeline.release_records(), 0);
        pipeline.shutdown();
    }

    #[test]
    fn test_dispatch_after_shutdown_is_ignored() {
        let (pipeline, _identity, _recorder, _rx) = pipeline();
        let producer = pipeline.producer(Arc::new(ThisThread(MonitoredThread::current())), Clock::new());
        pipeline.shutdown();
        producer.dispatch(&format!("{DISPATCH_PREFIX}too late"));
    }
}
