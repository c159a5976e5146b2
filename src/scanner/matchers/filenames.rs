//! Filename matcher: denylisted glob patterns against working-tree files.

#![allow(missing_docs)]

use super::{IndicatorMatcher, MatchReport, RepoContext};
use crate::core::errors::ShsError;
use crate::scanner::finding::{Finding, FindingCategory};
use crate::scanner::patterns::{FilenamePattern, FilenamePatternSet};

pub struct FilenameMatcher {
    patterns: FilenamePatternSet,
}

impl FilenameMatcher {
    /// Compile the patterns; ones that do not compile are returned as warnings.
    pub fn new(patterns: &[String]) -> (Self, Vec<ShsError>) {
        let (patterns, errors) = FilenamePatternSet::compile(patterns);
        (Self { patterns }, errors)
    }
}

impl IndicatorMatcher for FilenameMatcher {
    fn name(&self) -> &'static str {
        "filename"
    }

    fn check(&self, ctx: &RepoContext<'_>) -> MatchReport {
        let mut report = MatchReport::default();
        if self.patterns.is_empty() {
            return report;
        }
        let root = &ctx.repo.root_path;
        for path in &ctx.inventory.files {
            if ctx.cancel.is_cancelled() {
                break;
            }
            for pattern in self.patterns.matches(root, path) {
                report.findings.push(
                    Finding::new(
                        FindingCategory::Filename,
                        root,
                        format!("matches denylisted pattern {:?}", FilenamePattern::raw(pattern)),
                    )
                    .with_path(path),
                );
            }
        }
        report
    }
}
