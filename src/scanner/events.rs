//! Scan events, the sink and observer seams, and cooperative cancellation.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::denylist::{DenylistKind, RejectedLine};
use crate::platform::pal::Volume;
use crate::scanner::finding::{CheckIssue, Finding, ScanSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Warn,
    Error,
}

/// Everything the scan engine reports. Sinks receive these in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    Message {
        level: MessageLevel,
        text: String,
    },
    ScanStarted {
        config_hash: String,
        parallelism: usize,
    },
    DenylistLoaded {
        kind: DenylistKind,
        path: PathBuf,
        entries: usize,
    },
    DenylistLineRejected(RejectedLine),
    VolumeStarted(Volume),
    VolumeFinished {
        path: PathBuf,
        repositories: u64,
        unreadable_dirs: u64,
    },
    RepositoryChecked {
        repo_path: PathBuf,
        findings: usize,
        issues: usize,
    },
    Finding(Finding),
    CheckIssue(CheckIssue),
    /// Raw finding list for one repository, one rendered line per finding.
    FindingsBlock {
        repo_path: PathBuf,
        lines: Vec<String>,
    },
    Summary(ScanSummary),
}

impl ScanEvent {
    pub fn info(text: impl Into<String>) -> Self {
        Self::Message {
            level: MessageLevel::Info,
            text: text.into(),
        }
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Self::Message {
            level: MessageLevel::Warn,
            text: text.into(),
        }
    }

    /// Stable event name, matching the serialized `event` tag.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::ScanStarted { .. } => "scan_started",
            Self::DenylistLoaded { .. } => "denylist_loaded",
            Self::DenylistLineRejected(_) => "denylist_line_rejected",
            Self::VolumeStarted(_) => "volume_started",
            Self::VolumeFinished { .. } => "volume_finished",
            Self::RepositoryChecked { .. } => "repository_checked",
            Self::Finding(_) => "finding",
            Self::CheckIssue(_) => "check_issue",
            Self::FindingsBlock { .. } => "findings_block",
            Self::Summary(_) => "summary",
        }
    }
}

/// Append-only, order-preserving destination for scan events.
pub trait ScanEventSink: Send + Sync {
    fn emit(&self, event: ScanEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ScanEventSink for NullSink {
    fn emit(&self, _event: ScanEvent) {}
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ScanEvent>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<ScanEvent> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn findings(&self) -> Vec<Finding> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ScanEvent::Finding(finding) => Some(finding.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn issues(&self) -> Vec<CheckIssue> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ScanEvent::CheckIssue(issue) => Some(issue.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ScanEventSink for MemorySink {
    fn emit(&self, event: ScanEvent) {
        self.events.lock().push(event);
    }
}

impl<S: ScanEventSink + ?Sized> ScanEventSink for Arc<S> {
    fn emit(&self, event: ScanEvent) {
        (**self).emit(event);
    }
}

/// Fan one event stream out to several sinks.
pub struct TeeSink {
    sinks: Vec<Box<dyn ScanEventSink>>,
}

impl TeeSink {
    #[must_use]
    pub fn new(sinks: Vec<Box<dyn ScanEventSink>>) -> Self {
        Self { sinks }
    }
}

impl ScanEventSink for TeeSink {
    fn emit(&self, event: ScanEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

/// A unit of work a progress presenter can track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanUnit {
    Denylist(DenylistKind),
    Volume(PathBuf),
    Repository(PathBuf),
}

/// Orchestrator state machine, one instance per full run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Init,
    LoadingDenylists,
    EnumeratingVolumes,
    EnumeratingRepositories,
    RunningMatchers,
    Summarizing,
    Done,
}

impl ScanPhase {
    /// Whether `next` is a legal transition from `self`.
    ///
    /// Repository enumeration and matcher execution interleave per volume,
    /// so those two may alternate.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::LoadingDenylists)
                | (Self::LoadingDenylists, Self::EnumeratingVolumes)
                | (
                    Self::EnumeratingVolumes | Self::RunningMatchers,
                    Self::EnumeratingRepositories
                )
                | (
                    Self::EnumeratingRepositories,
                    Self::EnumeratingRepositories | Self::RunningMatchers
                )
                | (
                    Self::EnumeratingVolumes
                        | Self::EnumeratingRepositories
                        | Self::RunningMatchers,
                    Self::Summarizing
                )
                | (Self::Summarizing, Self::Done)
        )
    }
}

/// Progress hook. Called from the orchestrator thread only.
pub trait ScanObserver: Send + Sync {
    fn on_phase(&self, _phase: ScanPhase) {}
    fn on_unit_start(&self, _unit: &ScanUnit) {}
    fn on_unit_done(&self, _unit: &ScanUnit) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ScanObserver for NoopObserver {}

/// Shared cancellation flag plus an optional wall-clock deadline.
///
/// Cloning shares the flag; the deadline is fixed at construction.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Wrap an existing flag, e.g. one registered with a signal handler.
    #[must_use]
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self {
            flag,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, budget: Option<Duration>) -> Self {
        self.deadline = budget.map(|budget| Instant::now() + budget);
        self
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left before the deadline, if one is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}
