//! Branch matcher: remote head branch names against the malicious-branch pattern.

#![allow(missing_docs)]

use std::sync::Arc;

use regex::Regex;

use super::{IndicatorMatcher, MatchReport, RepoContext};
use crate::core::errors::{Result, ShsError};
use crate::scanner::finding::{CheckIssue, CheckKind, Finding, FindingCategory};
use crate::scanner::git::{RemoteBranchLister, RemoteHeads};

pub struct BranchMatcher {
    lister: Arc<dyn RemoteBranchLister>,
    pattern: Regex,
}

impl BranchMatcher {
    pub fn new(lister: Arc<dyn RemoteBranchLister>, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|err| ShsError::InvalidConfig {
            details: format!("matchers.branch_pattern {pattern:?} does not compile: {err}"),
        })?;
        Ok(Self { lister, pattern })
    }
}

impl IndicatorMatcher for BranchMatcher {
    fn name(&self) -> &'static str {
        "branch"
    }

    fn check(&self, ctx: &RepoContext<'_>) -> MatchReport {
        let mut report = MatchReport::default();
        let root = &ctx.repo.root_path;
        match self.lister.head_branches(ctx.repo, ctx.cancel) {
            Ok(RemoteHeads::Branches(branches)) => {
                report.findings.extend(
                    branches
                        .iter()
                        .filter(|branch| self.pattern.is_match(branch))
                        .map(|branch| {
                            Finding::new(
                                FindingCategory::Branch,
                                root,
                                format!("remote branch {branch:?} matches {}", self.pattern),
                            )
                        }),
                );
            }
            Ok(RemoteHeads::NoRemote) => report.issues.push(CheckIssue::skipped(
                CheckKind::Branch,
                root,
                "no remote configured",
            )),
            // Cancellation is reported once on the summary, not per repository.
            Err(ShsError::Cancelled) => {}
            Err(err) => report.issues.push(CheckIssue::failed(
                CheckKind::Branch,
                root,
                format!("remote query failed: {err}"),
            )),
        }
        report
    }
}
