use hangdog_common::{Collector, CollectorError};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::host::ForegroundProbe;

pub const NAME: &str = "ForegroundCollector";

/// Whether the host was in the foreground when the event fired
pub struct ForegroundCollector {
    probe: Arc<dyn ForegroundProbe>,
}

impl ForegroundCollector {
    #[must_use]
    pub fn new(probe: Arc<dyn ForegroundProbe>) -> Self {
        Self { probe }
    }
}

impl Collector for ForegroundCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn collect(&self) -> Result<Value, CollectorError> {
        Ok(json!({ "foreground": self.probe.is_foreground() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Visibility;

    #[test]
    fn test_follows_probe() {
        let visibility = Arc::new(Visibility::default());
        let collector = ForegroundCollector::new(visibility.clone());
        assert_eq!(collector.collect().unwrap()["foreground"], true);

        visibility.set_foreground(false);
        assert_eq!(collector.collect().unwrap()["foreground"], false);
    }
}
