//! Indicator matchers.
//!
//! Each matcher is stateless with respect to the scan: it receives one
//! repository (plus its file inventory) and returns findings and issues.
//! Matchers never mutate repository contents.

#![allow(missing_docs)]

pub mod branch;
pub mod filenames;
pub mod hashes;
pub mod packages;

use std::sync::Arc;

use crate::core::config::MatchersConfig;
use crate::core::errors::{Result, ShsError};
use crate::denylist::Denylist;
use crate::scanner::events::CancelToken;
use crate::scanner::finding::{CheckIssue, Finding};
use crate::scanner::git::RemoteBranchLister;
use crate::scanner::walker::{RepoInventory, Repository};

pub use branch::BranchMatcher;
pub use filenames::FilenameMatcher;
pub use hashes::{FileHashMatcher, sha256_file};
pub use packages::PackageMatcher;

/// Everything a matcher may look at for one repository.
#[derive(Debug, Clone, Copy)]
pub struct RepoContext<'a> {
    pub repo: &'a Repository,
    pub inventory: &'a RepoInventory,
    pub cancel: &'a CancelToken,
}

/// Output of one matcher (or the merged output of all of them).
#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    pub findings: Vec<Finding>,
    pub issues: Vec<CheckIssue>,
}

impl MatchReport {
    pub fn merge(&mut self, other: Self) {
        self.findings.extend(other.findings);
        self.issues.extend(other.issues);
    }
}

pub trait IndicatorMatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, ctx: &RepoContext<'_>) -> MatchReport;
}

/// The four matchers in merge order: branch, packages, file hash, filename.
pub struct MatcherSet {
    matchers: Vec<Box<dyn IndicatorMatcher>>,
}

impl MatcherSet {
    /// Build the standard set. Filename patterns that fail to compile are
    /// returned as warnings; the branch pattern must compile.
    pub fn build(
        config: &MatchersConfig,
        denylist: &Arc<Denylist>,
        lister: Arc<dyn RemoteBranchLister>,
    ) -> Result<(Self, Vec<ShsError>)> {
        let branch = BranchMatcher::new(lister, &config.branch_pattern)?;
        let (filenames, warnings) = FilenameMatcher::new(denylist.filename_patterns());
        let matchers: Vec<Box<dyn IndicatorMatcher>> = vec![
            Box::new(branch),
            Box::new(PackageMatcher::new(denylist.packages(), config)),
            Box::new(FileHashMatcher::new(
                Arc::clone(denylist),
                &config.hash_extensions,
            )),
            Box::new(filenames),
        ];
        Ok((Self { matchers }, warnings))
    }

    /// Run every matcher against one repository and merge in order.
    #[must_use]
    pub fn check(&self, ctx: &RepoContext<'_>) -> MatchReport {
        let mut report = MatchReport::default();
        for matcher in &self.matchers {
            if ctx.cancel.is_cancelled() {
                break;
            }
            report.merge(matcher.check(ctx));
        }
        report
    }
}

/// Lowercased extension of `path`, if any.
pub(crate) fn extension_lower(path: &std::path::Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Basename of `path` as a lossy string.
pub(crate) fn basename(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
