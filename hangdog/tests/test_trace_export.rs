use crossbeam_channel::{unbounded, Sender};
use hangdog::domain::CaptureError;
use hangdog::export::ChromeTraceExporter;
use hangdog::host::Looper;
use hangdog::stack::FnCapturer;
use hangdog::{Config, DiagnosticEvent, EventListener, Hangdog};
use std::sync::Arc;
use std::time::Duration;

struct Forward(Sender<DiagnosticEvent>);

impl EventListener for Forward {
    fn on_hang(&self, event: DiagnosticEvent) {
        let _ = self.0.send(event);
    }
}

#[test]
fn test_export_creates_valid_json() {
    let exporter = ChromeTraceExporter::new();
    let mut buffer = Vec::new();
    exporter.export(&mut buffer).expect("Failed to export trace");

    let parsed: serde_json::Value = serde_json::from_slice(&buffer).expect("Invalid JSON");
    assert!(parsed.get("traceEvents").is_some());
    assert_eq!(parsed["displayTimeUnit"], "ms");
}

#[test]
fn test_export_hang_from_live_engine() {
    let (looper, thread) = Looper::spawn("export-main").unwrap();
    let (tx, events) = unbounded();
    let config = Config::default()
        .with_hang_thresholds(300, 600)
        .with_slow_task_threshold(1000)
        .with_min_race_interval(100)
        .with_diagnostics(false);
    let hangdog = Hangdog::builder(config, Arc::new(looper.clone()))
        .listener(Arc::new(Forward(tx)))
        .stack_capturer(Arc::new(FnCapturer(|| Ok::<_, CaptureError>("#0 export::stall".to_string()))))
        .build()
        .unwrap();
    hangdog.start().unwrap();

    looper.post("warmup", || {});
    looper.post("stall", || std::thread::sleep(Duration::from_millis(700)));
    let hang = events.recv_timeout(Duration::from_secs(3)).unwrap();
    assert_eq!(hang.environment, "");

    let mut exporter = ChromeTraceExporter::new();
    exporter.add_event(&hang);
    let mut buffer = Vec::new();
    exporter.export(&mut buffer).unwrap();
    let trace: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
    let trace_events = trace["traceEvents"].as_array().unwrap();

    let stall = trace_events
        .iter()
        .find(|e| e["ph"] == "X" && e["name"] == "stall")
        .expect("stall slice");
    assert_eq!(stall["args"]["in_flight"], true);
    assert!(trace_events.iter().any(|e| e["ph"] == "X" && e["name"] == "warmup"));

    let instant = trace_events.iter().find(|e| e["ph"] == "i").expect("hang instant");
    assert_eq!(instant["name"], "hang");
    assert_eq!(instant["args"]["stack"], "#0 export::stall");

    drop(hangdog);
    looper.quit();
    thread.join().unwrap();
}
