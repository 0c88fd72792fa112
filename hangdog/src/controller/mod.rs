//! Engine context: wiring, lifecycle and event assembly
//!
//! [`Hangdog`] owns everything; there is no global state. Building it spawns
//! the three engine threads once. [`Hangdog::start`] and [`Hangdog::stop`]
//! only attach and detach the host's marker hook and the dispatch pool, so
//! start/stop cycles reuse the threads. Dropping the context joins them.
//!
//! ## Thread Model
//!
//! ```text
//!  monitored thread ──marker──▶ hangdog-sampling ──▶ SamplingModel
//!                                      │ on_sampling
//!                     ┌────────────────┼─────────────────┐
//!                     ▼                ▼                 ▼
//!            hangdog-watchdog   hangdog-stack-capture   slow task?
//!                     │ on_hang_detected                 │
//!                     └────────────▶ hangdog-event ◀─────┘
//!                                        │
//!                                        ▼
//!                                  EventListener
//! ```

pub mod dump;

use hangdog_common::{Collector, EventKind};
use log::{debug, info};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::ThreadId;

use crate::clock::Clock;
use crate::collectors::{self, CollectorContext};
use crate::config::Config;
use crate::domain::{HangdogError, PipelineIdentity};
use crate::host::{ForegroundProbe, HostLooper, Visibility};
use crate::logging;
use crate::sampling::pipeline::{LOW_MEMORY_RECORD_POOL_SIZE, RECORD_POOL_SIZE};
use crate::sampling::{
    MarkerProducer, SamplingListener, SamplingModel, SamplingPipeline, SamplingRecord,
    SamplingStatus, StackCaptureWorker,
};
use crate::scheduling::DispatchPool;
use crate::stack::{SignalStackCapturer, StackCapturer};
use crate::watchdog::{HangListener, HangReport, RaceSettings, Watchdog, WatchdogParts};

pub use dump::{DiagnosticEvent, EventListener};
use dump::{dedup_by_name, Reporter};

/// Engine threads, created once by [`HangdogBuilder::build`]
struct Engine {
    pipeline: SamplingPipeline,
    capture: StackCaptureWorker,
    watchdog: Watchdog,
    producer: MarkerProducer,
}

/// State shared with the engine threads, which only hold it weakly
struct Core {
    config: Config,
    clock: Clock,
    host: Arc<dyn HostLooper>,
    model: Arc<SamplingModel>,
    reporter: Arc<Reporter>,
    /// `Some` while started
    pool: RwLock<Option<Arc<DispatchPool>>>,
    /// Id of the last record reported as a hang; never reported again as slow
    last_hang_record: AtomicU64,
    engine: OnceLock<Arc<Engine>>,
}

impl Core {
    fn dispatch(&self, event: DiagnosticEvent) {
        let Some(pool) = self.pool.read().clone() else {
            debug!("Not started, {} event dropped", event.kind);
            return;
        };
        let reporter = Arc::clone(&self.reporter);
        pool.execute(Box::new(move || reporter.deliver(event)));
    }
}

impl SamplingListener for Core {
    fn on_sampling(&self, record: &SamplingRecord, caller: ThreadId) {
        let Some(engine) = self.engine.get() else {
            return;
        };
        match record.status() {
            SamplingStatus::Started => {
                engine.watchdog.arm(record, caller);
                engine.capture.schedule_capture(caller);
            }
            SamplingStatus::Finished => {
                engine.capture.cancel_capture(caller);

                let slow = record.duration().is_some_and(|d| d >= self.config.slow_task_threshold());
                if !slow || self.last_hang_record.load(Ordering::Acquire) == record.id() {
                    return;
                }
                self.dispatch(DiagnosticEvent {
                    kind: EventKind::SlowTask,
                    detected_at: self.clock.now(),
                    stack: record.stack().unwrap_or_default().to_string(),
                    current: Some(record.clone()),
                    history: Vec::new(),
                    environment: String::new(),
                });
            }
        }
    }
}

impl HangListener for Core {
    fn on_hang_detected(&self, report: HangReport) {
        let detected_at = self.clock.now();
        if let Some(record) = &report.current {
            self.last_hang_record.store(record.id(), Ordering::Release);
        }
        self.dispatch(DiagnosticEvent {
            kind: EventKind::Hang,
            detected_at,
            stack: report.stack,
            current: report.current,
            history: report.history,
            environment: String::new(),
        });
    }
}

/// Hang and slow-task detector for one monitored thread
pub struct Hangdog {
    core: Arc<Core>,
    engine: Arc<Engine>,
}

impl Hangdog {
    #[must_use]
    pub fn builder(config: Config, host: Arc<dyn HostLooper>) -> HangdogBuilder {
        HangdogBuilder {
            config,
            host,
            listener: None,
            collectors: Vec::new(),
            capturer: None,
            foreground: None,
            app_name: None,
            app_version: String::new(),
        }
    }

    /// Start watching. Calling it again while started does nothing.
    ///
    /// # Errors
    /// Returns [`HangdogError::ThreadSpawn`] if the dispatch worker cannot start.
    pub fn start(&self) -> Result<(), HangdogError> {
        {
            let mut pool = self.core.pool.write();
            if pool.is_some() {
                return Ok(());
            }
            *pool = Some(Arc::new(DispatchPool::start()?));
        }
        let producer = self.engine.producer.clone();
        self.core
            .host
            .set_marker_hook(Some(Arc::new(move |marker: &str| producer.dispatch(marker))));
        info!("hangdog started");
        Ok(())
    }

    /// Stop watching, forget the history and release pooled task records.
    /// Only acts when started.
    pub fn stop(&self) {
        let Some(pool) = self.core.pool.write().take() else {
            return;
        };
        self.core.host.set_marker_hook(None);
        self.engine.watchdog.disarm();
        pool.shutdown();
        self.core.model.clear();
        let released = self.engine.pipeline.release_records();
        info!("hangdog stopped, released {released} pooled records");
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.core.pool.read().is_some()
    }

    /// True while a watchdog race is outstanding
    #[must_use]
    pub fn in_race(&self) -> bool {
        self.engine.watchdog.in_race()
    }

    #[must_use]
    pub fn current_record(&self) -> Option<SamplingRecord> {
        self.core.model.current_record()
    }

    /// Recent task records, most recent first
    #[must_use]
    pub fn history_snapshot(&self) -> Vec<SamplingRecord> {
        self.core.model.history_snapshot()
    }

    /// History capacity after the low-memory reduction
    #[must_use]
    pub fn history_capacity(&self) -> usize {
        self.core.model.capacity()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.core.config
    }
}

impl Drop for Hangdog {
    fn drop(&mut self) {
        self.stop();
        self.engine.pipeline.shutdown();
        self.engine.capture.shutdown();
        self.engine.watchdog.shutdown();
    }
}

/// Everything that is not plain configuration
pub struct HangdogBuilder {
    config: Config,
    host: Arc<dyn HostLooper>,
    listener: Option<Arc<dyn EventListener>>,
    collectors: Vec<(EventKind, Arc<dyn Collector>)>,
    capturer: Option<Arc<dyn StackCapturer>>,
    foreground: Option<Arc<dyn ForegroundProbe>>,
    app_name: Option<String>,
    app_version: String,
}

impl HangdogBuilder {
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Add a collector to the dump of `kind`. It takes precedence over a
    /// configured reference collector of the same name.
    #[must_use]
    pub fn collector(mut self, kind: EventKind, collector: Arc<dyn Collector>) -> Self {
        self.collectors.push((kind, collector));
        self
    }

    /// Replace the signal-based stack sampler
    #[must_use]
    pub fn stack_capturer(mut self, capturer: Arc<dyn StackCapturer>) -> Self {
        self.capturer = Some(capturer);
        self
    }

    #[must_use]
    pub fn foreground(mut self, probe: Arc<dyn ForegroundProbe>) -> Self {
        self.foreground = Some(probe);
        self
    }

    /// Identity reported by `AppCollector`
    #[must_use]
    pub fn app(mut self, name: &str, version: &str) -> Self {
        self.app_name = Some(name.to_string());
        self.app_version = version.to_string();
        self
    }

    fn collector_set(
        &self,
        kind: EventKind,
        names: &[String],
        ctx: &CollectorContext,
    ) -> Vec<Arc<dyn Collector>> {
        let custom = self
            .collectors
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, c)| Arc::clone(c));
        let reference = names.iter().filter_map(|name| collectors::by_name(name, ctx));
        dedup_by_name(custom.chain(reference).collect())
    }

    /// Validate the config, install the configured logger unless the host has
    /// one, and spawn the engine threads.
    ///
    /// # Errors
    /// Returns [`HangdogError::InvalidConfig`] for a config that fails
    /// [`Config::validate`], or [`HangdogError::ThreadSpawn`].
    pub fn build(self) -> Result<Hangdog, HangdogError> {
        self.config.validate()?;
        // no-op when the host already installed a logger
        logging::init(self.config.log_level, self.config.log_target);

        let low_memory = self.config.is_low_memory();
        let clock = Clock::new();
        let identity = Arc::new(PipelineIdentity::default());
        let model = Arc::new(SamplingModel::new(
            self.config.effective_cache_size(low_memory),
            Arc::clone(&identity),
        ));
        let foreground: Arc<dyn ForegroundProbe> = match &self.foreground {
            Some(probe) => Arc::clone(probe),
            None => Arc::new(Visibility::default()),
        };
        let capturer: Arc<dyn StackCapturer> = match &self.capturer {
            Some(capturer) => Arc::clone(capturer),
            None => Arc::new(SignalStackCapturer::new(Arc::clone(&self.host))),
        };

        let ctx = CollectorContext {
            host: Arc::clone(&self.host),
            foreground: Arc::clone(&foreground),
            app_name: self.app_name.clone().unwrap_or_else(default_app_name),
            app_version: self.app_version.clone(),
        };
        let reporter = Arc::new(Reporter {
            listener: self.listener.clone(),
            hang_collectors: self.collector_set(EventKind::Hang, &self.config.hang_collectors, &ctx),
            slow_task_collectors: self.collector_set(
                EventKind::SlowTask,
                &self.config.slow_task_collectors,
                &ctx,
            ),
            diagnostics_enabled: self.config.diagnostics_enabled,
        });

        let core = Arc::new(Core {
            config: self.config.clone(),
            clock,
            host: Arc::clone(&self.host),
            model: Arc::clone(&model),
            reporter,
            pool: RwLock::new(None),
            last_hang_record: AtomicU64::new(0),
            engine: OnceLock::new(),
        });
        let weak_core: Weak<Core> = Arc::downgrade(&core);
        let sampling_listener: Weak<dyn SamplingListener> = weak_core.clone();
        let hang_listener: Weak<dyn HangListener> = weak_core;

        let pool_size = if low_memory { LOW_MEMORY_RECORD_POOL_SIZE } else { RECORD_POOL_SIZE };
        let pipeline =
            SamplingPipeline::spawn(Arc::clone(&model), Arc::clone(&identity), sampling_listener, pool_size)?;
        let capture = StackCaptureWorker::spawn(
            self.config.slow_task_threshold(),
            Arc::clone(&model),
            Arc::clone(&capturer),
            Arc::clone(&identity),
        )?;
        let watchdog = Watchdog::spawn(
            RaceSettings {
                foreground_threshold: self.config.foreground_hang_threshold(),
                background_threshold: self.config.background_hang_threshold(),
                min_race_interval: self.config.min_race_interval(),
            },
            WatchdogParts {
                host: Arc::clone(&self.host),
                model,
                capturer,
                foreground,
                identity,
                listener: hang_listener,
            },
        )?;
        let producer = pipeline.producer(Arc::clone(&self.host), clock);

        let engine = Arc::new(Engine { pipeline, capture, watchdog, producer });
        let _ = core.engine.set(Arc::clone(&engine));

        debug!(
            "hangdog built: history {} (low memory: {low_memory}), thresholds {}/{}ms, slow {}ms",
            core.model.capacity(),
            self.config.foreground_hang_threshold_ms,
            self.config.background_hang_threshold_ms,
            self.config.slow_task_threshold_ms,
        );
        Ok(Hangdog { core, engine })
    }
}

fn default_app_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default()
}
