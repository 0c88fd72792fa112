use hangdog_common::{Collector, CollectorError};
use serde_json::{json, Value};

pub const NAME: &str = "AppCollector";

/// Application identity: name, version, pid and executable
pub struct AppCollector {
    name: String,
    version: String,
}

impl AppCollector {
    #[must_use]
    pub fn new(name: &str, version: &str) -> Self {
        Self { name: name.to_string(), version: version.to_string() }
    }
}

impl Collector for AppCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn collect(&self) -> Result<Value, CollectorError> {
        let exe = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        Ok(json!({
            "name": self.name,
            "version": self.version,
            "pid": std::process::id(),
            "exe": exe,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_data() {
        let data = AppCollector::new("demo", "0.3.0").collect().unwrap();
        assert_eq!(data["name"], "demo");
        assert_eq!(data["version"], "0.3.0");
        assert_eq!(data["pid"], std::process::id());
    }
}
