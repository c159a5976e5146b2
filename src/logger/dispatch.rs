//! Log dispatcher: fans scan events out to the JSONL and text logs from a
//! dedicated thread.
//!
//! Scan threads send `ScanEvent`s over a bounded crossbeam channel. Progress
//! chatter uses `try_send()` and is dropped under back-pressure; findings,
//! check issues and the summary block until the logger thread accepts them,
//! so the persisted record of a scan is never lossy.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{Result, ShsError};
use crate::logger::jsonl::{JsonlConfig, JsonlWriter, LogEntry, Severity};
use crate::logger::text::TextLogWriter;
use crate::scanner::events::{ScanEvent, ScanEventSink};

/// Default bounded channel capacity for log events.
const CHANNEL_CAPACITY: usize = 1024;

enum LogMessage {
    Event(ScanEvent),
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

/// Thread-safe, cheaply-cloneable handle for sending scan events to the logs.
#[derive(Clone)]
pub struct ScanLoggerHandle {
    tx: Sender<LogMessage>,
    dropped_events: Arc<AtomicU64>,
}

impl ScanLoggerHandle {
    /// Send an event to the logger thread.
    ///
    /// Durable events block; everything else is dropped (and counted) when
    /// the channel is full.
    pub fn send(&self, event: ScanEvent) {
        if is_durable(&event) {
            // Disconnected is fine during shutdown.
            let _ = self.tx.send(LogMessage::Event(event));
            return;
        }
        if let Err(TrySendError::Full(_)) = self.tx.try_send(LogMessage::Event(event)) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of events dropped due to channel back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Join its handle afterwards.
    pub fn shutdown(&self) {
        let _ = self.tx.send(LogMessage::Shutdown);
    }
}

impl ScanEventSink for ScanLoggerHandle {
    fn emit(&self, event: ScanEvent) {
        self.send(event);
    }
}

const fn is_durable(event: &ScanEvent) -> bool {
    matches!(
        event,
        ScanEvent::Finding(_)
            | ScanEvent::FindingsBlock { .. }
            | ScanEvent::CheckIssue(_)
            | ScanEvent::Summary(_)
    )
}

/// Which logs to write.
pub struct LoggerConfig {
    /// Structured log. `None` disables it.
    pub jsonl: Option<JsonlConfig>,
    /// Human-readable log. `None` disables it.
    pub text_path: Option<PathBuf>,
    /// Bounded channel capacity.
    pub channel_capacity: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            jsonl: Some(JsonlConfig::default()),
            text_path: None,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread and return a handle.
///
/// The logger thread runs until `handle.shutdown()` is called or all
/// handles are dropped.
pub fn spawn_logger(config: LoggerConfig) -> Result<(ScanLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<LogMessage>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ScanLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("shs-logger".to_string())
        .spawn(move || {
            logger_thread_main(&rx, config.jsonl, config.text_path, &dropped_clone);
        })
        .map_err(|e| ShsError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(
    rx: &Receiver<LogMessage>,
    jsonl_config: Option<JsonlConfig>,
    text_path: Option<PathBuf>,
    dropped: &AtomicU64,
) {
    let mut jsonl = jsonl_config.map(JsonlWriter::open);
    let mut text = text_path.as_deref().map(TextLogWriter::open);

    while let Ok(message) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let details = format!("{d} log events dropped due to back-pressure");
            if let Some(w) = jsonl.as_mut() {
                let mut warn = LogEntry::new("events_dropped", Severity::Warning);
                warn.count = Some(d);
                warn.details = Some(details.clone());
                w.write_entry(&warn);
            }
            if let Some(t) = text.as_mut() {
                t.write_line(&format!("WARNING: {details}"));
            }
        }

        let LogMessage::Event(event) = message else {
            break;
        };

        if let Some(w) = jsonl.as_mut() {
            w.write_entry(&LogEntry::from_event(&event));
        }
        if let Some(t) = text.as_mut() {
            t.write_event(&event);
            if matches!(event, ScanEvent::Summary(_)) {
                t.flush();
            }
        }
    }

    if let Some(w) = jsonl.as_mut() {
        w.flush();
        w.fsync();
    }
    if let Some(t) = text.as_mut() {
        t.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::finding::{Finding, FindingCategory, ScanSummary};
    use std::path::Path;

    fn test_config(dir: &Path) -> LoggerConfig {
        LoggerConfig {
            jsonl: Some(JsonlConfig {
                path: dir.join("scan.jsonl"),
                fallback_path: None,
                max_size_bytes: 10 * 1024 * 1024,
                keep_rotated: 1,
            }),
            text_path: Some(dir.join("scan.log")),
            channel_capacity: 64,
        }
    }

    #[test]
    fn spawn_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path())).unwrap();
        handle.emit(ScanEvent::ScanStarted {
            config_hash: "abc".to_string(),
            parallelism: 4,
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("scan.jsonl")).unwrap();
        assert!(contents.contains("scan_started"));
        let text = std::fs::read_to_string(dir.path().join("scan.log")).unwrap();
        assert!(text.contains("scan started (config abc, 4 workers)"));
    }

    #[test]
    fn both_logs_receive_findings_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path())).unwrap();
        let finding = Finding::new(FindingCategory::FileHash, Path::new("/r"), "sha256 ab")
            .with_path("/r/bundle.js");
        handle.emit(ScanEvent::Finding(finding.clone()));
        handle.emit(ScanEvent::FindingsBlock {
            repo_path: PathBuf::from("/r"),
            lines: vec![finding.display_line()],
        });
        handle.emit(ScanEvent::Summary(ScanSummary {
            repository_count: 1,
            high_count: 1,
            ..ScanSummary::default()
        }));
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("scan.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 3);
        let text = std::fs::read_to_string(dir.path().join("scan.log")).unwrap();
        assert!(text.contains("1 finding(s) in /r"));
        assert!(text.contains("repositories checked: 1"));
    }

    #[test]
    fn handles_cloneable_and_send() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path())).unwrap();
        let h2 = handle.clone();
        let worker = thread::spawn(move || h2.emit(ScanEvent::info("from worker")));
        worker.join().unwrap();
        handle.emit(ScanEvent::info("from main"));
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("scan.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn disabled_backends_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggerConfig {
            jsonl: None,
            text_path: None,
            channel_capacity: 4,
        };
        let (handle, join) = spawn_logger(config).unwrap();
        handle.emit(ScanEvent::info("nowhere"));
        handle.shutdown();
        join.join().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn durable_events_are_classified() {
        assert!(is_durable(&ScanEvent::Summary(ScanSummary::default())));
        assert!(!is_durable(&ScanEvent::info("progress")));
    }

    #[test]
    fn dropped_counter_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path())).unwrap();
        assert_eq!(handle.dropped_events(), 0);
        handle.shutdown();
        join.join().unwrap();
    }
}
