use hangdog::host::Looper;
use hangdog::logging::LogLevel;
use hangdog::{Config, Hangdog, HangdogError};
use std::sync::Arc;

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hangdog.json");
    std::fs::write(
        &path,
        r#"{
            "foreground_hang_threshold_ms": 2500,
            "history_cache_size": 12,
            "low_memory": true,
            "log_level": "debug",
            "hang_collectors": ["ThreadCollector", "FdCollector"]
        }"#,
    )
    .unwrap();

    let config = Config::from_json_file(&path).unwrap();
    assert_eq!(config.foreground_hang_threshold_ms, 2500);
    assert_eq!(config.background_hang_threshold_ms, 8000);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.hang_collectors, ["ThreadCollector", "FdCollector"]);
    assert!(config.validate().is_ok());

    let (looper, thread) = Looper::spawn("config-main").unwrap();
    let hangdog = Hangdog::builder(config, Arc::new(looper.clone())).build().unwrap();
    // low memory halves the history
    assert_eq!(hangdog.history_capacity(), 6);
    drop(hangdog);
    looper.quit();
    thread.join().unwrap();
}

#[test]
fn test_unknown_collector_fails_build() {
    let config = Config::default().with_collectors(&["AppCollector"], &["GpuCollector"]);
    let err = Hangdog::builder(config, Arc::new(Looper::new())).build().err().unwrap();
    assert!(matches!(err, HangdogError::InvalidConfig(_)));
    assert!(err.to_string().contains("GpuCollector"));
}

#[test]
fn test_missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(err.to_string().contains("absent.json"));
}
