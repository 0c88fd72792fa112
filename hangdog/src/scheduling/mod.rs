//! Delayed work: deadline queue, timer threads and the event dispatch pool

pub mod delay_queue;
pub mod dispatch;
pub mod timer;

use std::thread::JoinHandle;

use crate::domain::HangdogError;

pub use delay_queue::DelayQueue;
pub use dispatch::DispatchPool;
pub use timer::{TimerJob, TimerThread};

/// Spawn a named OS thread.
///
/// # Errors
/// Returns [`HangdogError::ThreadSpawn`] if the OS refuses the thread.
pub fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>, HangdogError>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|source| HangdogError::ThreadSpawn { name: name.to_string(), source })
}
