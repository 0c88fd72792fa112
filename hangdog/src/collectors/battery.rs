//! Battery level and charging state from `/sys/class/power_supply`

use hangdog_common::{Collector, CollectorError};
use serde_json::{json, Value};
use std::path::PathBuf;

use super::read_trimmed;

pub const NAME: &str = "BatteryCollector";

const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

pub struct BatteryCollector {
    root: PathBuf,
}

impl BatteryCollector {
    /// Read batteries under `root` instead of the sysfs default
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// First supply whose `type` is `Battery`
    fn battery_dir(&self) -> Option<PathBuf> {
        let mut dirs: Vec<PathBuf> =
            std::fs::read_dir(&self.root).ok()?.filter_map(|e| e.ok().map(|e| e.path())).collect();
        dirs.sort();
        dirs.into_iter()
            .find(|dir| read_trimmed(dir.join("type")).is_ok_and(|t| t == "Battery"))
    }
}

impl Default for BatteryCollector {
    fn default() -> Self {
        Self::with_root(POWER_SUPPLY_DIR)
    }
}

impl Collector for BatteryCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn collect(&self) -> Result<Value, CollectorError> {
        let dir = self.battery_dir();
        let capacity = dir
            .as_ref()
            .and_then(|d| read_trimmed(d.join("capacity")).ok())
            .and_then(|c| c.parse::<i64>().ok())
            .unwrap_or(-1);
        let status = dir
            .as_ref()
            .and_then(|d| read_trimmed(d.join("status")).ok())
            .unwrap_or_else(|| "Unknown".to_string());

        Ok(json!({ "capacity": capacity, "status": status }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_battery_supply() {
        let root = tempfile::tempdir().unwrap();
        let ac = root.path().join("AC");
        let bat = root.path().join("BAT0");
        std::fs::create_dir(&ac).unwrap();
        std::fs::create_dir(&bat).unwrap();
        std::fs::write(ac.join("type"), "Mains\n").unwrap();
        std::fs::write(bat.join("type"), "Battery\n").unwrap();
        std::fs::write(bat.join("capacity"), "87\n").unwrap();
        std::fs::write(bat.join("status"), "Discharging\n").unwrap();

        let data = BatteryCollector::with_root(root.path()).collect().unwrap();
        assert_eq!(data["capacity"], 87);
        assert_eq!(data["status"], "Discharging");
    }

    #[test]
    fn test_no_battery_uses_sentinels() {
        let root = tempfile::tempdir().unwrap();
        let data = BatteryCollector::with_root(root.path().join("missing")).collect().unwrap();
        assert_eq!(data["capacity"], -1);
        assert_eq!(data["status"], "Unknown");
    }
}
