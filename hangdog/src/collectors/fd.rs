//! Open file descriptors of the process, grouped by kind

use anyhow::Context as _;
use hangdog_common::{Collector, CollectorError};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const NAME: &str = "FdCollector";

const FD_DIR: &str = "/proc/self/fd";

pub struct FdCollector {
    dir: PathBuf,
}

impl FdCollector {
    #[must_use]
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Default for FdCollector {
    fn default() -> Self {
        Self::with_dir(FD_DIR)
    }
}

/// `socket:[123]` -> socket, `/dev/null` -> file, `anon_inode:[eventfd]` -> anon_inode
fn kind_of(target: &str) -> &str {
    match target.split_once(':') {
        Some((kind, rest)) if rest.starts_with('[') => kind,
        _ => "file",
    }
}

impl Collector for FdCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn collect(&self) -> Result<Value, CollectorError> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))
            .map_err(|e| CollectorError::Failed(format!("{e:#}")))?;

        let mut count = 0usize;
        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        for entry in entries.flatten() {
            count += 1;
            let kind = std::fs::read_link(entry.path())
                .map(|t| kind_of(&t.to_string_lossy()).to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            *by_kind.entry(kind).or_default() += 1;
        }

        Ok(json!({ "count": count, "by_kind": by_kind }))
    }
}
