//! Stack snapshots of the monitored thread
//!
//! [`StackCapturer`] is the seam: the engine only ever asks for "the stack of
//! the monitored thread, as text". [`SignalStackCapturer`] implements it for
//! Linux processes; hosts with their own mechanism (a VM, a runtime with
//! managed stacks) plug in a [`FnCapturer`].

pub mod resolver;
pub mod signal;

use crate::domain::CaptureError;

pub use resolver::StackResolver;
pub use signal::SignalStackCapturer;

pub trait StackCapturer: Send + Sync {
    /// Snapshot the monitored thread's call stack.
    ///
    /// # Errors
    /// Any [`CaptureError`]; callers treat capture as best-effort.
    fn capture(&self) -> Result<String, CaptureError>;

    /// Load whatever the first capture would otherwise load lazily.
    fn prepare(&self) {}
}

/// Closure adapter for [`StackCapturer`]
pub struct FnCapturer<F>(pub F);

impl<F> StackCapturer for FnCapturer<F>
where
    F: Fn() -> Result<String, CaptureError> + Send + Sync,
{
    fn capture(&self) -> Result<String, CaptureError> {
        (self.0)()
    }
}
