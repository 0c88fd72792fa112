//! Task sampling
//!
//! - `record`: raw marker and sampling record value types
//! - `model`: bounded circular history, the source of truth for every reader
//! - `pipeline`: the `hangdog-sampling` thread and the host-side producer
//! - `capture`: speculative stack snapshot scheduled per task

pub mod capture;
pub mod model;
pub mod pipeline;
pub mod record;

pub use capture::StackCaptureWorker;
pub use model::SamplingModel;
pub use pipeline::{MarkerProducer, SamplingListener, SamplingPipeline};
pub use record::{SamplingRecord, SamplingStatus, TaskRecord};
