//! Findings, check issues, and the severity-bucketed scan summary.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Severity assigned by the matcher that produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Branch,
    PackageManifest,
    PackageLockfile,
    FileHash,
    Filename,
}

impl FindingCategory {
    /// Fixed severity per indicator kind.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::Branch | Self::FileHash => Severity::High,
            Self::PackageManifest | Self::PackageLockfile | Self::Filename => Severity::Medium,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Branch => "branch",
            Self::PackageManifest => "package_manifest",
            Self::PackageLockfile => "package_lockfile",
            Self::FileHash => "file_hash",
            Self::Filename => "filename",
        }
    }
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected indicator occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub category: FindingCategory,
    pub repo_path: PathBuf,
    /// Offending file, when the indicator lives in one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub detail: String,
}

impl Finding {
    pub fn new(category: FindingCategory, repo_path: &Path, detail: impl Into<String>) -> Self {
        Self {
            severity: category.severity(),
            category,
            repo_path: repo_path.to_path_buf(),
            path: None,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Single-line rendering used for findings blocks in the text log.
    #[must_use]
    pub fn display_line(&self) -> String {
        match &self.path {
            Some(path) => format!(
                "[{}] {} {}: {}",
                self.severity.as_str().to_ascii_uppercase(),
                self.category,
                path.display(),
                self.detail
            ),
            None => format!(
                "[{}] {}: {}",
                self.severity.as_str().to_ascii_uppercase(),
                self.category,
                self.detail
            ),
        }
    }
}

/// Which sub-check a [`CheckIssue`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Inventory,
    Branch,
    Manifest,
    Lockfile,
    FileHash,
    Filename,
}

impl CheckKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inventory => "inventory",
            Self::Branch => "branch",
            Self::Manifest => "manifest",
            Self::Lockfile => "lockfile",
            Self::FileHash => "file_hash",
            Self::Filename => "filename",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueOutcome {
    /// The check was attempted and could not complete.
    Failed,
    /// The check does not apply (e.g. no remote configured).
    Skipped,
}

/// A sub-check that did not produce a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckIssue {
    pub check: CheckKind,
    pub outcome: IssueOutcome,
    pub repo_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub details: String,
}

impl CheckIssue {
    pub fn failed(check: CheckKind, repo_path: &Path, details: impl Into<String>) -> Self {
        Self {
            check,
            outcome: IssueOutcome::Failed,
            repo_path: repo_path.to_path_buf(),
            path: None,
            details: details.into(),
        }
    }

    pub fn skipped(check: CheckKind, repo_path: &Path, details: impl Into<String>) -> Self {
        Self {
            outcome: IssueOutcome::Skipped,
            ..Self::failed(check, repo_path, details)
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.outcome == IssueOutcome::Failed
    }
}

/// Overall verdict derived from a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanVerdict {
    Clean,
    /// No findings, but some checks could not run or the scan was cut short.
    Inconclusive,
    Compromised,
}

/// Final counters for one full scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub drive_count: u64,
    pub repository_count: u64,
    pub low_count: u64,
    pub medium_count: u64,
    pub high_count: u64,
    pub incomplete_checks: u64,
    pub skipped_checks: u64,
    pub cancelled: bool,
}

impl ScanSummary {
    #[must_use]
    pub fn total_findings(&self) -> u64 {
        self.low_count + self.medium_count + self.high_count
    }

    #[must_use]
    pub fn verdict(&self) -> ScanVerdict {
        if self.total_findings() > 0 {
            ScanVerdict::Compromised
        } else if self.incomplete_checks > 0 || self.cancelled {
            ScanVerdict::Inconclusive
        } else {
            ScanVerdict::Clean
        }
    }
}

/// Single writer of the [`ScanSummary`] for a run.
#[derive(Debug, Default)]
pub struct SummaryAggregator {
    summary: ScanSummary,
}

impl SummaryAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_volume(&mut self) {
        self.summary.drive_count += 1;
    }

    pub fn record_repository(&mut self) {
        self.summary.repository_count += 1;
    }

    pub fn record_finding(&mut self, finding: &Finding) {
        match finding.severity {
            Severity::Low => self.summary.low_count += 1,
            Severity::Medium => self.summary.medium_count += 1,
            Severity::High => self.summary.high_count += 1,
        }
    }

    pub fn record_issue(&mut self, issue: &CheckIssue) {
        match issue.outcome {
            IssueOutcome::Failed => self.summary.incomplete_checks += 1,
            IssueOutcome::Skipped => self.summary.skipped_checks += 1,
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.summary.cancelled = true;
    }

    #[must_use]
    pub fn finish(self) -> ScanSummary {
        self.summary
    }
}
