//! Package reference matcher.
//!
//! Manifests are parsed and checked for exact `name` + `version` pins under
//! `dependencies` and `devDependencies`. Lockfiles are searched as plain
//! text for denylisted package names only; their nested layout carries
//! versions in too many shapes to correlate reliably.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use memchr::memmem;
use serde::Deserialize;

use super::{IndicatorMatcher, MatchReport, RepoContext, basename};
use crate::core::config::MatchersConfig;
use crate::core::paths::relative_slash_path;
use crate::denylist::PackageRef;
use crate::scanner::finding::{CheckIssue, CheckKind, Finding, FindingCategory};

/// The subset of a package manifest the matcher reads.
#[derive(Debug, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub dependencies: Option<HashMap<String, serde_json::Value>>,
    #[serde(default, rename = "devDependencies")]
    pub dev_dependencies: Option<HashMap<String, serde_json::Value>>,
}

impl Manifest {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Declared version string for `name` in the given section.
    ///
    /// Non-string values (git URLs in object form, nulls) yield `None`.
    #[must_use]
    pub fn version_in(&self, section: DependencySection, name: &str) -> Option<&str> {
        let map = match section {
            DependencySection::Dependencies => self.dependencies.as_ref(),
            DependencySection::DevDependencies => self.dev_dependencies.as_ref(),
        }?;
        map.get(name).and_then(serde_json::Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencySection {
    Dependencies,
    DevDependencies,
}

impl DependencySection {
    pub const ALL: [Self; 2] = [Self::Dependencies, Self::DevDependencies];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Dependencies => "dependencies",
            Self::DevDependencies => "devDependencies",
        }
    }
}

pub struct PackageMatcher {
    packages: Vec<PackageRef>,
    /// Unique names with a prebuilt substring searcher each.
    name_finders: Vec<(String, memmem::Finder<'static>)>,
    manifest_names: Vec<String>,
    lockfile_names: Vec<String>,
    skip_markers: Vec<String>,
}

impl PackageMatcher {
    pub fn new(packages: &[PackageRef], config: &MatchersConfig) -> Self {
        let mut names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        let name_finders = names
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    memmem::Finder::new(name.as_bytes()).into_owned(),
                )
            })
            .collect();
        Self {
            packages: packages.to_vec(),
            name_finders,
            manifest_names: lowercase_all(&config.manifest_names),
            lockfile_names: lowercase_all(&config.lockfile_names),
            skip_markers: lowercase_all(&config.skip_path_markers),
        }
    }

    fn is_skipped_fixture(&self, repo_root: &Path, path: &Path) -> bool {
        let relative = relative_slash_path(repo_root, path).to_ascii_lowercase();
        self.skip_markers
            .iter()
            .any(|marker| !marker.is_empty() && relative.contains(marker.as_str()))
    }

    fn check_manifest(&self, ctx: &RepoContext<'_>, path: &Path, report: &mut MatchReport) {
        let repo_root = &ctx.repo.root_path;
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                report.issues.push(
                    CheckIssue::failed(
                        CheckKind::Manifest,
                        repo_root,
                        format!("unreadable manifest: {err}"),
                    )
                    .with_path(path),
                );
                return;
            }
        };
        let manifest = match Manifest::parse(&raw) {
            Ok(manifest) => manifest,
            Err(err) => {
                report.issues.push(
                    CheckIssue::failed(
                        CheckKind::Manifest,
                        repo_root,
                        format!("unparseable manifest: {err}"),
                    )
                    .with_path(path),
                );
                return;
            }
        };

        for (package, sections) in manifest_hits(&manifest, &self.packages) {
            report.findings.push(
                Finding::new(
                    FindingCategory::PackageManifest,
                    repo_root,
                    format!(
                        "{}@{} declared in {}",
                        package.name,
                        package.version,
                        sections.join(", ")
                    ),
                )
                .with_path(path),
            );
        }
    }

    fn check_lockfile(&self, ctx: &RepoContext<'_>, path: &Path, report: &mut MatchReport) {
        let repo_root = &ctx.repo.root_path;
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                report.issues.push(
                    CheckIssue::failed(
                        CheckKind::Lockfile,
                        repo_root,
                        format!("unreadable lockfile: {err}"),
                    )
                    .with_path(path),
                );
                return;
            }
        };

        let (count, names) = lockfile_matches(&bytes, &self.name_finders);
        if count > 0 {
            report.findings.push(
                Finding::new(
                    FindingCategory::PackageLockfile,
                    repo_root,
                    format!(
                        "{count} line match(es) for denylisted packages: {}",
                        names.join(", ")
                    ),
                )
                .with_path(path),
            );
        }
    }
}

impl IndicatorMatcher for PackageMatcher {
    fn name(&self) -> &'static str {
        "packages"
    }

    fn check(&self, ctx: &RepoContext<'_>) -> MatchReport {
        let mut report = MatchReport::default();
        if self.packages.is_empty() {
            return report;
        }
        for path in &ctx.inventory.files {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let name = basename(path).to_ascii_lowercase();
            if self.manifest_names.contains(&name) {
                if !self.is_skipped_fixture(&ctx.repo.root_path, path) {
                    self.check_manifest(ctx, path, &mut report);
                }
            } else if self.lockfile_names.contains(&name) {
                self.check_lockfile(ctx, path, &mut report);
            }
        }
        report
    }
}

/// Denylisted packages pinned at their exact version, with the sections
/// that declare them. One entry per package.
fn manifest_hits<'a>(
    manifest: &Manifest,
    packages: &'a [PackageRef],
) -> Vec<(&'a PackageRef, Vec<&'static str>)> {
    let mut hits: BTreeMap<&'a PackageRef, Vec<&'static str>> = BTreeMap::new();
    for package in packages {
        for section in DependencySection::ALL {
            if manifest.version_in(section, &package.name) == Some(package.version.as_str()) {
                hits.entry(package).or_default().push(section.key());
            }
        }
    }
    hits.into_iter().collect()
}

/// Count (name, line) hits across all lines; also return which names hit.
fn lockfile_matches(bytes: &[u8], finders: &[(String, memmem::Finder<'static>)]) -> (u64, Vec<String>) {
    let mut count = 0u64;
    let mut hit_names = vec![false; finders.len()];
    for line in bytes.split(|b| *b == b'\n') {
        for (idx, (_, finder)) in finders.iter().enumerate() {
            if finder.find(line).is_some() {
                count += 1;
                hit_names[idx] = true;
            }
        }
    }
    let names = finders
        .iter()
        .zip(hit_names)
        .filter_map(|((name, _), hit)| hit.then(|| name.clone()))
        .collect();
    (count, names)
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.to_ascii_lowercase()).collect()
}
