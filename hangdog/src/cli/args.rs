//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "hangdog",
    version,
    about = "Watch a serial task thread for hangs and slow tasks",
    after_help = "\
Runs a demonstration workload on a monitored thread: quick tasks, one slow
task and one stall. Events are printed to stdout as JSON lines.

EXAMPLES:
    hangdog                                     Default thresholds (4s hang, 300ms slow)
    hangdog --foreground-threshold 800 --stall 1200
    hangdog --config hangdog.json --export trace.json
    hangdog --background                        Use the background hang threshold"
)]
pub struct Args {
    /// JSON config file; flags override its values
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Hang threshold while in the foreground
    #[arg(long, value_name = "MS")]
    pub foreground_threshold: Option<u64>,

    /// Hang threshold while in the background
    #[arg(long, value_name = "MS")]
    pub background_threshold: Option<u64>,

    /// Slow-task threshold
    #[arg(long, value_name = "MS")]
    pub slow_threshold: Option<u64>,

    /// Number of task records kept in history
    #[arg(long, value_name = "N")]
    pub cache_size: Option<usize>,

    /// How long the stalling task blocks (default: hang threshold + 1000)
    #[arg(long, value_name = "MS")]
    pub stall: Option<u64>,

    /// Number of quick tasks before the slow one
    #[arg(long, default_value = "20", value_name = "N")]
    pub tasks: usize,

    /// Pretend the app is in the background
    #[arg(long)]
    pub background: bool,

    /// Skip environment collectors
    #[arg(long)]
    pub no_diagnostics: bool,

    /// Export detected events as a Chrome trace
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}
