//! # hangdog - Demonstration Binary
//!
//! Spawns a [`Looper`] as the monitored thread, attaches the engine and runs
//! a small workload on it: quick tasks, one slow task and one stall. Every
//! detected event is printed to stdout as a JSON line; `--export` also writes
//! them as a Chrome trace.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, unbounded, Sender};
use hangdog::cli::{load_config, Args, Workload};
use hangdog::export::ChromeTraceExporter;
use hangdog::host::{Looper, Visibility};
use hangdog::logging::{self, LogLevel};
use hangdog::{DiagnosticEvent, EventKind, EventListener, Hangdog, HangdogError};
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::time::Duration;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Time left for the last events to reach the listener
const DRAIN_GRACE: Duration = Duration::from_millis(500);

fn main() {
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let config_error = err.chain().any(|cause| {
        cause.is::<hangdog::domain::ConfigError>()
            || matches!(cause.downcast_ref::<HangdogError>(), Some(HangdogError::InvalidConfig(_)))
    });
    if config_error {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

struct ChannelListener(Sender<DiagnosticEvent>);

impl EventListener for ChannelListener {
    fn on_hang(&self, event: DiagnosticEvent) {
        let _ = self.0.send(event);
    }

    fn on_slow_task(&self, event: DiagnosticEvent) {
        let _ = self.0.send(event);
    }
}

#[inline(never)]
fn busy_task(how_long: Duration) {
    std::thread::sleep(how_long);
}

#[inline(never)]
fn stalling_task(how_long: Duration) {
    std::thread::sleep(how_long);
}

fn run() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    let level = if args.quiet { LogLevel::Error } else { config.log_level };
    logging::init(level, config.log_target);

    let workload = Workload::plan(&args, &config);
    let (looper, looper_thread) = Looper::spawn("hangdog-demo-main")?;
    let (events_tx, events_rx) = unbounded();

    let hangdog = Hangdog::builder(config, Arc::new(looper.clone()))
        .listener(Arc::new(ChannelListener(events_tx)))
        .foreground(Arc::new(Visibility::new(!args.background)))
        .app("hangdog-demo", env!("CARGO_PKG_VERSION"))
        .build()?;
    hangdog.start()?;
    info!(
        "Running {} quick tasks, a {:?} slow task and a {:?} stall",
        workload.quick_tasks, workload.slow, workload.stall
    );

    for i in 0..workload.quick_tasks {
        let quick = workload.quick;
        looper.post(&format!("demo::quick#{i}"), move || busy_task(quick));
    }
    let slow = workload.slow;
    looper.post("demo::slow", move || busy_task(slow));
    let stall = workload.stall;
    looper.post("demo::stall", move || stalling_task(stall));

    let (done_tx, done_rx) = bounded(1);
    looper.post("demo::done", move || {
        let _ = done_tx.send(());
    });
    done_rx
        .recv_timeout(workload.total() + Duration::from_secs(5))
        .context("Workload did not finish in time")?;
    std::thread::sleep(DRAIN_GRACE);

    hangdog.stop();
    drop(hangdog);
    looper.quit();
    let _ = looper_thread.join();

    let mut exporter = ChromeTraceExporter::new();
    let (mut hangs, mut slow_tasks) = (0usize, 0usize);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for event in events_rx.try_iter() {
        match event.kind {
            EventKind::Hang => hangs += 1,
            EventKind::SlowTask => slow_tasks += 1,
        }
        writeln!(out, "{}", serde_json::to_string(&event)?)?;
        exporter.add_event(&event);
    }
    out.flush()?;

    if let Some(path) = &args.export {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        exporter.export(BufWriter::new(file))?;
        if !args.quiet {
            eprintln!("Trace written to {}", path.display());
        }
    }
    if !args.quiet {
        eprintln!("{hangs} hang(s), {slow_tasks} slow task(s)");
    }
    Ok(())
}
