//! File hash matcher: SHA-256 of candidate source files against the denylist.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::{IndicatorMatcher, MatchReport, RepoContext, extension_lower};
use crate::denylist::Denylist;
use crate::scanner::finding::{CheckIssue, CheckKind, Finding, FindingCategory};

const READ_BUF_BYTES: usize = 64 * 1024;

pub struct FileHashMatcher {
    denylist: Arc<Denylist>,
    extensions: Vec<String>,
}

impl FileHashMatcher {
    pub fn new(denylist: Arc<Denylist>, extensions: &[String]) -> Self {
        Self {
            denylist,
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    fn is_candidate(&self, path: &Path) -> bool {
        extension_lower(path).is_some_and(|ext| self.extensions.contains(&ext))
    }
}

impl IndicatorMatcher for FileHashMatcher {
    fn name(&self) -> &'static str {
        "file_hash"
    }

    fn check(&self, ctx: &RepoContext<'_>) -> MatchReport {
        let mut report = MatchReport::default();
        if self.denylist.hash_count() == 0 {
            return report;
        }
        for path in ctx.inventory.files.iter().filter(|p| self.is_candidate(p)) {
            if ctx.cancel.is_cancelled() {
                break;
            }
            match sha256_file(path) {
                Ok(digest) if self.denylist.contains_hash(&digest) => {
                    report.findings.push(
                        Finding::new(
                            FindingCategory::FileHash,
                            &ctx.repo.root_path,
                            format!("sha256 {digest} is denylisted"),
                        )
                        .with_path(path),
                    );
                }
                Ok(_) => {}
                Err(err) => report.issues.push(
                    CheckIssue::failed(
                        CheckKind::FileHash,
                        &ctx.repo.root_path,
                        format!("unreadable file: {err}"),
                    )
                    .with_path(path),
                ),
            }
        }
        report
    }
}

/// Stream a file through SHA-256 and return the lowercase hex digest.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_BYTES];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}
