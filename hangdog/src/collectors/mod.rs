//! Reference environment collectors
//!
//! Each collector is stateless and fails on its own: an unreadable source
//! yields sentinel values (`-1`, `""`, `"Unknown"`) inside its data, and only
//! a collector that cannot produce anything at all returns an error slot.
//!
//! Config files refer to collectors by [`Collector::name`].

pub mod app;
pub mod battery;
pub mod device;
pub mod fd;
pub mod foreground;
pub mod memory;
pub mod threads;

use hangdog_common::Collector;
use std::sync::Arc;

use crate::host::{ForegroundProbe, HostLooper};

pub use app::AppCollector;
pub use battery::BatteryCollector;
pub use device::DeviceCollector;
pub use fd::FdCollector;
pub use foreground::ForegroundCollector;
pub use memory::MemoryCollector;
pub use threads::ThreadCollector;

/// Names resolvable by [`by_name`]
pub const KNOWN: [&str; 7] = [
    app::NAME,
    battery::NAME,
    device::NAME,
    fd::NAME,
    foreground::NAME,
    memory::NAME,
    threads::NAME,
];

pub const DEFAULT_HANG_SET: &[&str] =
    &[app::NAME, memory::NAME, threads::NAME, device::NAME, fd::NAME];

pub const DEFAULT_SLOW_TASK_SET: &[&str] = &[app::NAME, memory::NAME];

/// What the reference collectors may need from the engine
#[derive(Clone)]
pub struct CollectorContext {
    pub host: Arc<dyn HostLooper>,
    pub foreground: Arc<dyn ForegroundProbe>,
    pub app_name: String,
    pub app_version: String,
}

#[must_use]
pub fn is_known(name: &str) -> bool {
    KNOWN.contains(&name)
}

/// Build the reference collector called `name`.
#[must_use]
pub fn by_name(name: &str, ctx: &CollectorContext) -> Option<Arc<dyn Collector>> {
    let collector: Arc<dyn Collector> = match name {
        app::NAME => Arc::new(AppCollector::new(&ctx.app_name, &ctx.app_version)),
        battery::NAME => Arc::new(BatteryCollector::default()),
        device::NAME => Arc::new(DeviceCollector::default()),
        fd::NAME => Arc::new(FdCollector::default()),
        foreground::NAME => Arc::new(ForegroundCollector::new(Arc::clone(&ctx.foreground))),
        memory::NAME => Arc::new(MemoryCollector::default()),
        threads::NAME => Arc::new(ThreadCollector::new(Arc::clone(&ctx.host))),
        _ => return None,
    };
    Some(collector)
}

/// Read a small text file, trimmed.
fn read_trimmed(path: impl AsRef<std::path::Path>) -> anyhow::Result<String> {
    use anyhow::Context as _;
    let path = path.as_ref();
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Looper, Visibility};

    fn context() -> CollectorContext {
        CollectorContext {
            host: Arc::new(Looper::new()),
            foreground: Arc::new(Visibility::default()),
            app_name: "demo".to_string(),
            app_version: "1.2.3".to_string(),
        }
    }

    #[test]
    fn test_every_known_name_resolves() {
        let ctx = context();
        for name in KNOWN {
            let collector = by_name(name, &ctx).unwrap();
            assert_eq!(collector.name(), name);
        }
        assert!(by_name("GpuCollector", &ctx).is_none());
    }

    #[test]
    fn test_default_sets_are_known() {
        assert!(DEFAULT_HANG_SET.iter().chain(DEFAULT_SLOW_TASK_SET).all(|n| is_known(n)));
    }
}
