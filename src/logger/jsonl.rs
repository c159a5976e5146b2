//! JSONL logger: append-only line-delimited JSON for machine consumption of scan results.
//!
//! Each line is a self-contained JSON object. Lines are assembled in memory and
//! written atomically via `write_all` to prevent interleaved partial lines when
//! the file is being tailed by another process.
//!
//! When the primary file cannot be written the writer moves to the fallback
//! file, then to stderr (lines prefixed `[SHS-JSONL]`), then discards. A scan
//! never fails because of logging.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ShsError};
use crate::scanner::events::{MessageLevel, ScanEvent};
use crate::scanner::finding::{ScanSummary, Severity as FindingSeverity};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

/// A single JSONL log entry. Only `ts`, `event`, and `severity` are always present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    /// Event name, matching [`ScanEvent::name`].
    pub event: String,
    pub severity: Severity,
    /// Affected file or list path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    /// Finding category or check kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Severity the matcher assigned to a finding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finding_severity: Option<FindingSeverity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ScanSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<String>>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: &str, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event: event.to_string(),
            severity,
            ..Self::default()
        }
    }

    /// Flatten a scan event into a log entry.
    #[must_use]
    pub fn from_event(event: &ScanEvent) -> Self {
        let path_str = |p: &Path| Some(p.display().to_string());
        match event {
            ScanEvent::Message { level, text } => {
                let severity = match level {
                    MessageLevel::Info => Severity::Info,
                    MessageLevel::Warn => Severity::Warning,
                    MessageLevel::Error => Severity::Critical,
                };
                Self {
                    details: Some(text.clone()),
                    ..Self::new(event.name(), severity)
                }
            }
            ScanEvent::ScanStarted {
                config_hash,
                parallelism,
            } => Self {
                config_hash: Some(config_hash.clone()),
                count: Some(*parallelism as u64),
                ..Self::new(event.name(), Severity::Info)
            },
            ScanEvent::DenylistLoaded {
                kind,
                path,
                entries,
            } => Self {
                path: path_str(path),
                category: Some(kind.as_str().to_string()),
                count: Some(*entries as u64),
                ..Self::new(event.name(), Severity::Info)
            },
            ScanEvent::DenylistLineRejected(rejected) => Self {
                path: path_str(&rejected.path),
                category: Some(rejected.kind.as_str().to_string()),
                line_number: Some(rejected.line_number),
                details: Some(rejected.reason.clone()),
                ..Self::new(event.name(), Severity::Warning)
            },
            ScanEvent::VolumeStarted(volume) => Self {
                path: path_str(&volume.path),
                details: Some(format!("{} ({})", volume.device, volume.fs_type)),
                ..Self::new(event.name(), Severity::Info)
            },
            ScanEvent::VolumeFinished {
                path,
                repositories,
                unreadable_dirs,
            } => Self {
                path: path_str(path),
                count: Some(*repositories),
                details: (*unreadable_dirs > 0)
                    .then(|| format!("{unreadable_dirs} unreadable directories skipped")),
                ..Self::new(event.name(), Severity::Info)
            },
            ScanEvent::RepositoryChecked {
                repo_path,
                findings,
                issues,
            } => Self {
                repo_path: path_str(repo_path),
                count: Some(*findings as u64),
                details: (*issues > 0).then(|| format!("{issues} checks incomplete or skipped")),
                ..Self::new(event.name(), Severity::Info)
            },
            ScanEvent::Finding(finding) => Self {
                repo_path: path_str(&finding.repo_path),
                path: finding.path.as_deref().and_then(path_str),
                category: Some(finding.category.as_str().to_string()),
                finding_severity: Some(finding.severity),
                details: Some(finding.detail.clone()),
                ..Self::new(
                    event.name(),
                    if finding.severity == FindingSeverity::High {
                        Severity::Critical
                    } else {
                        Severity::Warning
                    },
                )
            },
            ScanEvent::CheckIssue(issue) => Self {
                repo_path: path_str(&issue.repo_path),
                path: issue.path.as_deref().and_then(path_str),
                category: Some(issue.check.as_str().to_string()),
                outcome: Some(
                    if issue.is_failure() {
                        "failed"
                    } else {
                        "skipped"
                    }
                    .to_string(),
                ),
                details: Some(issue.details.clone()),
                ..Self::new(
                    event.name(),
                    if issue.is_failure() {
                        Severity::Warning
                    } else {
                        Severity::Info
                    },
                )
            },
            ScanEvent::FindingsBlock { repo_path, lines } => Self {
                repo_path: path_str(repo_path),
                count: Some(lines.len() as u64),
                lines: Some(lines.clone()),
                ..Self::new(event.name(), Severity::Warning)
            },
            ScanEvent::Summary(summary) => Self {
                summary: Some(summary.clone()),
                ..Self::new(
                    event.name(),
                    if summary.total_findings() > 0 {
                        Severity::Critical
                    } else {
                        Severity::Info
                    },
                )
            },
        }
    }
}

/// Where the writer currently sends lines, in degradation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

impl LogTarget {
    const fn next(self) -> Self {
        match self {
            Self::Primary => Self::Fallback,
            Self::Fallback => Self::Stderr,
            Self::Stderr | Self::Discard => Self::Discard,
        }
    }
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Used when `path` cannot be opened or written, e.g. a RAM-backed file.
    pub fallback_path: Option<PathBuf>,
    /// A file reaching this size is rotated before the next line.
    pub max_size_bytes: u64,
    /// Rotated generations kept as `<path>.1` (newest) to `<path>.N`.
    pub keep_rotated: u32,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: crate::core::config::PathsConfig::default().jsonl_log,
            fallback_path: Some(PathBuf::from("/dev/shm/shs.jsonl")),
            max_size_bytes: 50 * 1024 * 1024,
            keep_rotated: 3,
        }
    }
}

struct OpenLog {
    path: PathBuf,
    out: BufWriter<File>,
    len: u64,
}

/// Append-only JSONL writer. Logging problems never surface as errors: the
/// writer steps down to the next [`LogTarget`] instead.
pub struct JsonlWriter {
    config: JsonlConfig,
    open: Option<OpenLog>,
    target: LogTarget,
}

impl JsonlWriter {
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            open: None,
            target: LogTarget::Primary,
        };
        writer.attach(LogTarget::Primary);
        writer
    }

    /// Serialize `entry` and append it as one line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.append(&line);
            }
            Err(e) => {
                let _ = writeln!(io::stderr(), "[SHS-JSONL] cannot serialize entry: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(log) = self.open.as_mut() {
            let _ = log.out.flush();
        }
    }

    /// Flush and sync file data to disk.
    pub fn fsync(&mut self) {
        if let Some(log) = self.open.as_mut() {
            let _ = log.out.flush();
            let _ = log.out.get_ref().sync_data();
        }
    }

    #[must_use]
    pub const fn target(&self) -> LogTarget {
        self.target
    }

    /// Size of the live log file, 0 when not writing to a file.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.open.as_ref().map_or(0, |log| log.len)
    }

    /// Open the first usable target at or after `from`.
    fn attach(&mut self, from: LogTarget) {
        self.open = None;
        let mut target = from;
        loop {
            let path = match target {
                LogTarget::Primary => Some(self.config.path.clone()),
                LogTarget::Fallback => self.config.fallback_path.clone(),
                LogTarget::Stderr | LogTarget::Discard => {
                    self.target = target;
                    return;
                }
            };
            if let Some(path) = path {
                match open_append(&path) {
                    Ok((file, len)) => {
                        if target == LogTarget::Fallback {
                            let _ = writeln!(
                                io::stderr(),
                                "[SHS-JSONL] logging to fallback {}",
                                path.display()
                            );
                        }
                        self.open = Some(OpenLog {
                            path,
                            out: BufWriter::with_capacity(64 * 1024, file),
                            len,
                        });
                        self.target = target;
                        return;
                    }
                    Err(e) => {
                        let _ = writeln!(io::stderr(), "[SHS-JSONL] {e}");
                    }
                }
            }
            target = target.next();
        }
    }

    fn append(&mut self, line: &str) {
        let line_len = line.len() as u64;
        loop {
            match self.target {
                LogTarget::Primary | LogTarget::Fallback => {
                    let full = self.open.as_ref().is_some_and(|log| {
                        log.len > 0 && log.len + line_len > self.config.max_size_bytes
                    });
                    if full {
                        self.rotate();
                        continue;
                    }
                    let written = match self.open.as_mut() {
                        Some(log) => {
                            let ok = log.out.write_all(line.as_bytes()).is_ok();
                            if ok {
                                log.len += line_len;
                            }
                            ok
                        }
                        None => false,
                    };
                    if written {
                        return;
                    }
                    self.attach(self.target.next());
                }
                LogTarget::Stderr => {
                    if write!(io::stderr(), "[SHS-JSONL] {line}").is_err() {
                        self.target = LogTarget::Discard;
                    }
                    return;
                }
                LogTarget::Discard => return,
            }
        }
    }

    /// Move the live file to `.1` and reopen an empty one at the same path.
    fn rotate(&mut self) {
        let Some(OpenLog { path, mut out, .. }) = self.open.take() else {
            return;
        };
        let _ = out.flush();
        drop(out);
        shift_generations(&path, self.config.keep_rotated);
        match open_append(&path) {
            Ok((file, len)) => {
                self.open = Some(OpenLog {
                    path,
                    out: BufWriter::with_capacity(64 * 1024, file),
                    len,
                });
            }
            Err(_) => self.attach(self.target.next()),
        }
    }
}

// ──────────────────────── helpers ────────────────────────

/// Open or create `path` for appending, creating parent directories.
/// Returns the file and its current length.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ShsError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ShsError::io(path, source))?;
    let len = file.metadata().map_or(0, |m| m.len());
    Ok((file, len))
}

/// `scan.jsonl` → `scan.jsonl.<n>`.
fn generation(base: &Path, n: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

/// Drop the oldest generation, shift the rest up by one, and move `base` to `.1`.
fn shift_generations(base: &Path, keep: u32) {
    if keep == 0 {
        let _ = fs::remove_file(base);
        return;
    }
    let _ = fs::remove_file(generation(base, keep));
    for n in (1..keep).rev() {
        let _ = fs::rename(generation(base, n), generation(base, n + 1));
    }
    let _ = fs::rename(base, generation(base, 1));
}

/// Format current UTC time as ISO 8601.
fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──────────────────────── tests ────────────────────────
