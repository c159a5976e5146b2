//! Human-readable scan log: timestamped single lines plus multi-line blocks
//! for raw finding lists.
//!
//! If the log file cannot be opened or written, output degrades to stderr
//! with a `[SHS-TEXT]` prefix. A scan never fails because of this log.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::scanner::events::{MessageLevel, ScanEvent};
use crate::scanner::finding::{IssueOutcome, ScanSummary};

pub struct TextLogWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl TextLogWriter {
    pub fn open(path: &Path) -> Self {
        let writer = match open_append(path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(err) => {
                eprintln!(
                    "[SHS-TEXT] cannot open {}: {err}; logging to stderr",
                    path.display()
                );
                None
            }
        };
        Self {
            path: path.to_path_buf(),
            writer,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether output currently goes to the file rather than stderr.
    #[must_use]
    pub fn is_file_backed(&self) -> bool {
        self.writer.is_some()
    }

    /// One timestamped line.
    pub fn write_line(&mut self, message: &str) {
        let line = format!("[{}] {message}\n", timestamp());
        self.write_raw(&line);
    }

    /// A header line followed by the block's lines, indented, written in one go.
    pub fn append_block(&mut self, header: &str, lines: &[String]) {
        let mut block = format!("[{}] {header}\n", timestamp());
        for line in lines {
            block.push_str("    ");
            block.push_str(line);
            block.push('\n');
        }
        self.write_raw(&block);
    }

    pub fn write_summary(&mut self, summary: &ScanSummary) {
        let mut lines = vec![
            format!("drives scanned:       {}", summary.drive_count),
            format!("repositories checked: {}", summary.repository_count),
            format!("high findings:        {}", summary.high_count),
            format!("medium findings:      {}", summary.medium_count),
            format!("low findings:         {}", summary.low_count),
            format!("incomplete checks:    {}", summary.incomplete_checks),
            format!("skipped checks:       {}", summary.skipped_checks),
        ];
        if summary.cancelled {
            lines.push("scan was cancelled before completion".to_string());
        }
        self.append_block("scan summary", &lines);
    }

    /// Render one scan event.
    pub fn write_event(&mut self, event: &ScanEvent) {
        match event {
            ScanEvent::Message { level, text } => {
                let prefix = match level {
                    MessageLevel::Info => "",
                    MessageLevel::Warn => "WARNING: ",
                    MessageLevel::Error => "ERROR: ",
                };
                self.write_line(&format!("{prefix}{text}"));
            }
            ScanEvent::ScanStarted {
                config_hash,
                parallelism,
            } => self.write_line(&format!(
                "scan started (config {config_hash}, {parallelism} workers)"
            )),
            ScanEvent::DenylistLoaded {
                kind,
                path,
                entries,
            } => self.write_line(&format!(
                "loaded {entries} {kind} entries from {}",
                path.display()
            )),
            ScanEvent::DenylistLineRejected(rejected) => self.write_line(&format!(
                "WARNING: skipped malformed line {} in {}: {}",
                rejected.line_number,
                rejected.path.display(),
                rejected.reason
            )),
            ScanEvent::VolumeStarted(volume) => self.write_line(&format!(
                "scanning volume {} ({}, {})",
                volume.path.display(),
                volume.device,
                volume.fs_type
            )),
            ScanEvent::VolumeFinished {
                path,
                repositories,
                unreadable_dirs,
            } => self.write_line(&format!(
                "finished volume {}: {repositories} repositories, {unreadable_dirs} unreadable directories skipped",
                path.display()
            )),
            // Individual findings are covered by the findings block.
            ScanEvent::Finding(_) | ScanEvent::RepositoryChecked { .. } => {}
            ScanEvent::CheckIssue(issue) => {
                let verb = match issue.outcome {
                    IssueOutcome::Failed => "could not complete",
                    IssueOutcome::Skipped => "skipped",
                };
                let location = issue
                    .path
                    .as_deref()
                    .unwrap_or(&issue.repo_path)
                    .display();
                self.write_line(&format!(
                    "{} check {verb} at {location}: {}",
                    issue.check.as_str(),
                    issue.details
                ));
            }
            ScanEvent::FindingsBlock { repo_path, lines } => self.append_block(
                &format!("{} finding(s) in {}", lines.len(), repo_path.display()),
                lines,
            ),
            ScanEvent::Summary(summary) => self.write_summary(summary),
        }
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    fn write_raw(&mut self, text: &str) {
        if let Some(w) = self.writer.as_mut() {
            if w.write_all(text.as_bytes()).is_ok() {
                return;
            }
            eprintln!(
                "[SHS-TEXT] write to {} failed; logging to stderr",
                self.path.display()
            );
            self.writer = None;
        }
        let _ = write!(io::stderr(), "[SHS-TEXT] {text}");
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
