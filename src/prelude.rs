//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use shai_hulud_scanner::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, ShsError};

// Denylists
pub use crate::denylist::{Denylist, DenylistEntry, DenylistKind};

// Platform
pub use crate::platform::pal::{MountPoint, Platform, Volume, detect_platform, list_volumes};

// Scanner
pub use crate::scanner::events::{
    CancelToken, MemorySink, ScanEvent, ScanEventSink, ScanObserver, ScanPhase,
};
pub use crate::scanner::finding::{
    CheckIssue, Finding, FindingCategory, ScanSummary, ScanVerdict, Severity,
};
pub use crate::scanner::git::{GitCli, RemoteBranchLister, RemoteHeads};
pub use crate::scanner::matchers::{IndicatorMatcher, MatcherSet};
pub use crate::scanner::orchestrator::ScanOrchestrator;
pub use crate::scanner::walker::{Repository, RepositoryWalker, WalkerConfig};

// Logging
pub use crate::logger::dispatch::{LoggerConfig, ScanLoggerHandle, spawn_logger};
