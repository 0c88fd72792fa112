//! # hangdog - Hang and Slow-Task Detection for a Serial Task Thread
//!
//! hangdog watches a host application whose work runs one task at a time on a
//! single thread (the *monitored thread*: a UI thread, an event loop, a game
//! loop). It reports two things:
//!
//! - **Hangs**: the monitored thread stayed blocked past a threshold (4s in
//!   the foreground, 8s in the background by default)
//! - **Slow tasks**: a task finished, but took at least the slow-task
//!   threshold (300ms by default)
//!
//! Each report carries the monitored thread's stack, the recent task history
//! and an environment dump from pluggable collectors.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Host (monitored thread)                        │
//! │      ">>>>> Dispatching to <task>" / "<<<<< Finished to <task>" │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ marker hook (lock-free hand-off)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 hangdog-sampling (pipeline)                     │
//! │         raw marker ──▶ SamplingModel (bounded history)          │
//! └──────┬────────────────────────┬──────────────────────┬──────────┘
//!        │ Started                │ Started/Finished     │ Finished
//!        ▼                        ▼                      ▼
//! ┌──────────────┐   ┌────────────────────────┐   ┌──────────────┐
//! │   Watchdog   │   │   Stack capture at     │   │  slow task?  │
//! │ defuser vs.  │   │   80% of slow threshold│   │              │
//! │  detonator   │   └────────────────────────┘   └──────┬───────┘
//! └──────┬───────┘                                       │
//!        │ hang                                          │
//!        └──────────────▶ hangdog-event workers ◀────────┘
//!                          (log, collectors, listener)
//! ```
//!
//! ## Module Structure
//!
//! ### Engine
//!
//! - [`sampling`]: task records, the history model, the pipeline thread and
//!   the speculative stack capture
//! - [`watchdog`]: the timer race that proves the monitored thread is blocked
//! - [`controller`]: [`Hangdog`], its builder and diagnostic event delivery
//! - [`scheduling`]: timer threads, the delay queue and the dispatch pool
//!
//! ### Host Side
//!
//! - [`host`]: the [`host::HostLooper`] seam and [`host::Looper`], a
//!   complete serial executor emitting the markers
//! - [`stack`]: stack capture; signal-based sampler on Linux
//! - [`symbolization`]: DWARF symbol resolution via `addr2line`, PIE
//!   address adjustment from `/proc/self/maps`
//! - [`collectors`]: reference environment collectors
//!
//! ### Plumbing
//!
//! - [`config`], [`logging`], [`clock`], [`domain`]
//! - [`export`]: Chrome Trace Event Format output for Perfetto
//! - [`cli`]: argument parsing of the demonstration binary
//!
//! ## Typical Usage
//!
//! ```no_run
//! use hangdog::host::Looper;
//! use hangdog::{Config, DiagnosticEvent, EventListener, Hangdog};
//! use std::sync::Arc;
//!
//! struct Print;
//!
//! impl EventListener for Print {
//!     fn on_hang(&self, event: DiagnosticEvent) {
//!         println!("hang in {:?}", event.current.map(|r| r.content().to_string()));
//!     }
//! }
//!
//! # fn main() -> Result<(), hangdog::HangdogError> {
//! let (looper, _thread) = Looper::spawn("main-loop")?;
//! let hangdog = Hangdog::builder(Config::default(), Arc::new(looper.clone()))
//!     .listener(Arc::new(Print))
//!     .build()?;
//! hangdog.start()?;
//! looper.post("load-settings", || { /* work */ });
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! - **Marker**: the string the host reports right before and after each task
//! - **Race**: a defuser posted on the monitored thread against a detonator
//!   on the watchdog thread; the detonator only wins if the monitored thread
//!   is stuck
//! - **Frame pointers**: required by the signal sampler; forced workspace-wide
//!   in `.cargo/config.toml`

pub mod cli;
pub mod clock;
pub mod collectors;
pub mod config;
pub mod controller;
pub mod domain;
pub mod export;
pub mod host;
pub mod logging;
pub mod sampling;
pub mod scheduling;
pub mod stack;
pub mod symbolization;
pub mod watchdog;

pub use config::Config;
pub use controller::{DiagnosticEvent, EventListener, Hangdog, HangdogBuilder};
pub use domain::HangdogError;
pub use hangdog_common::EventKind;
