//! Scan orchestrator: preflight, denylist loading, volume and repository
//! enumeration, the matcher worker pool, and summary aggregation.
//!
//! Repositories are checked in parallel by a bounded pool of workers. Each
//! worker sends a [`RepoOutcome`] back over a channel; the orchestrator
//! thread is the only writer of the [`ScanSummary`].

#![allow(missing_docs)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crossbeam_channel as channel;

use crate::core::config::Config;
use crate::core::errors::{Result, ShsError};
use crate::core::paths::resolve_absolute_path;
use crate::denylist::{Denylist, DenylistLoad};
use crate::platform::pal::{Platform, Volume, list_volumes};
use crate::scanner::events::{
    CancelToken, NoopObserver, ScanEvent, ScanEventSink, ScanObserver, ScanPhase, ScanUnit,
};
use crate::scanner::finding::{CheckIssue, Finding, ScanSummary, SummaryAggregator};
use crate::scanner::git::RemoteBranchLister;
use crate::scanner::matchers::{MatchReport, MatcherSet, RepoContext};
use crate::scanner::walker::{
    InventoryOptions, Repository, RepositoryWalker, WalkerConfig, inventory_repository,
};

/// Everything the workers produced for one repository.
#[derive(Debug)]
pub struct RepoOutcome {
    pub repo: Repository,
    pub findings: Vec<Finding>,
    pub issues: Vec<CheckIssue>,
}

/// One full scan run.
pub struct ScanOrchestrator {
    config: Config,
    platform: Arc<dyn Platform>,
    lister: Arc<dyn RemoteBranchLister>,
    sink: Arc<dyn ScanEventSink>,
    observer: Arc<dyn ScanObserver>,
    cancel: CancelToken,
    phase: ScanPhase,
}

impl ScanOrchestrator {
    pub fn new(
        config: Config,
        platform: Arc<dyn Platform>,
        lister: Arc<dyn RemoteBranchLister>,
        sink: Arc<dyn ScanEventSink>,
    ) -> Self {
        let cancel = CancelToken::new().with_deadline(config.scanner.scan_deadline());
        Self {
            config,
            platform,
            lister,
            sink,
            observer: Arc::new(NoopObserver),
            cancel,
            phase: ScanPhase::Init,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ScanObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replace the cancellation token (e.g. one wired to SIGINT).
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    #[must_use]
    pub const fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// Preflight, load the configured denylists, then scan.
    pub fn run(&mut self) -> Result<ScanSummary> {
        self.preflight()?;
        self.advance(ScanPhase::LoadingDenylists);
        let load = self.load_denylists()?;
        self.scan(Arc::new(load.denylist))
    }

    /// Preflight and scan with an already-built denylist.
    pub fn run_with_denylist(&mut self, denylist: Denylist) -> Result<ScanSummary> {
        if denylist.hash_count() == 0
            || denylist.filename_patterns().is_empty()
            || denylist.packages().is_empty()
        {
            return Err(ShsError::InvalidConfig {
                details: "every denylist kind needs at least one entry".to_string(),
            });
        }
        self.preflight()?;
        self.advance(ScanPhase::LoadingDenylists);
        self.scan(Arc::new(denylist))
    }

    fn preflight(&mut self) -> Result<()> {
        if self.phase != ScanPhase::Init {
            return Err(ShsError::Runtime {
                details: "scan orchestrator instances are single-use".to_string(),
            });
        }
        self.config.validate()?;
        let version = self.lister.ensure_available()?;
        self.sink.emit(ScanEvent::ScanStarted {
            config_hash: self.config.stable_hash()?,
            parallelism: self.config.scanner.parallelism,
        });
        self.sink.emit(ScanEvent::info(format!("source-control tool: {version}")));
        Ok(())
    }

    fn load_denylists(&self) -> Result<DenylistLoad> {
        for kind in crate::denylist::DenylistKind::ALL {
            self.observer.on_unit_start(&ScanUnit::Denylist(kind));
        }
        let load = Denylist::load(&self.config.denylists)?;
        for list in &load.lists {
            self.sink.emit(ScanEvent::DenylistLoaded {
                kind: list.kind,
                path: list.path.clone(),
                entries: list.entries.len(),
            });
            for rejected in &list.rejected {
                self.sink.emit(ScanEvent::DenylistLineRejected(rejected.clone()));
            }
            self.observer.on_unit_done(&ScanUnit::Denylist(list.kind));
        }
        Ok(load)
    }

    fn scan(&mut self, denylist: Arc<Denylist>) -> Result<ScanSummary> {
        let (matchers, warnings) =
            MatcherSet::build(&self.config.matchers, &denylist, Arc::clone(&self.lister))?;
        for warning in warnings {
            self.sink.emit(ScanEvent::warn(format!("skipping filename pattern: {warning}")));
        }
        let matchers = Arc::new(matchers);

        self.advance(ScanPhase::EnumeratingVolumes);
        let volumes = self.volumes()?;

        let parallelism = self.config.scanner.parallelism.max(1);
        let (job_tx, job_rx) = channel::bounded::<Repository>(parallelism * 2);
        let (result_tx, result_rx) = channel::unbounded::<RepoOutcome>();
        let inventory_options = InventoryOptions {
            max_depth: self.config.scanner.max_depth,
            follow_symlinks: self.config.scanner.follow_symlinks,
            excluded_paths: self.config.scanner.excluded_paths.iter().cloned().collect(),
        };

        let mut workers = Vec::with_capacity(parallelism);
        for _ in 0..parallelism {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let matchers = Arc::clone(&matchers);
            let options = inventory_options.clone();
            let cancel = self.cancel.clone();
            workers.push(thread::spawn(move || {
                worker_loop(&job_rx, &result_tx, &matchers, &options, &cancel);
            }));
        }
        drop(job_rx);
        drop(result_tx);

        let mut aggregator = SummaryAggregator::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        for volume in volumes {
            if self.cancel.is_cancelled() {
                break;
            }
            self.enumerate_volume(&volume, &job_tx, &result_rx, &mut seen, &mut aggregator);
        }

        // Close the job queue; workers exit once it drains.
        drop(job_tx);
        for outcome in &result_rx {
            self.fold_outcome(outcome, &mut aggregator);
        }
        for worker in workers {
            if worker.join().is_err() {
                self.sink.emit(ScanEvent::Message {
                    level: crate::scanner::events::MessageLevel::Error,
                    text: "matcher worker panicked; its repository results are missing"
                        .to_string(),
                });
                aggregator.mark_cancelled();
            }
        }

        if self.cancel.is_cancelled() {
            aggregator.mark_cancelled();
        }

        self.advance(ScanPhase::Summarizing);
        let summary = aggregator.finish();
        self.sink.emit(ScanEvent::Summary(summary.clone()));
        self.advance(ScanPhase::Done);
        Ok(summary)
    }

    fn volumes(&self) -> Result<Vec<Volume>> {
        let scanner = &self.config.scanner;
        if scanner.roots.is_empty() {
            list_volumes(self.platform.as_ref(), &scanner.excluded_paths)
        } else {
            Ok(scanner.roots.iter().cloned().map(Volume::from_root).collect())
        }
    }

    fn enumerate_volume(
        &mut self,
        volume: &Volume,
        job_tx: &channel::Sender<Repository>,
        result_rx: &channel::Receiver<RepoOutcome>,
        seen: &mut HashSet<PathBuf>,
        aggregator: &mut SummaryAggregator,
    ) {
        self.advance(ScanPhase::EnumeratingRepositories);
        aggregator.record_volume();
        let unit = ScanUnit::Volume(volume.path.clone());
        self.observer.on_unit_start(&unit);
        self.sink.emit(ScanEvent::VolumeStarted(volume.clone()));

        let scanner = &self.config.scanner;
        let walker = RepositoryWalker::new(
            WalkerConfig {
                root_paths: vec![volume.path.clone()],
                max_depth: scanner.max_depth,
                follow_symlinks: scanner.follow_symlinks,
                cross_devices: scanner.cross_devices,
                parallelism: scanner.parallelism,
                excluded_paths: scanner.excluded_paths.iter().cloned().collect(),
            },
            self.cancel.clone(),
        );

        let mut repositories = 0u64;
        match walker.stream() {
            Ok(stream) => {
                for repo in stream {
                    // Bind mounts and overlapping roots reach the same tree twice.
                    if !seen.insert(resolve_absolute_path(&repo.root_path)) {
                        continue;
                    }
                    repositories += 1;
                    aggregator.record_repository();
                    self.advance(ScanPhase::RunningMatchers);
                    self.observer
                        .on_unit_start(&ScanUnit::Repository(repo.root_path.clone()));
                    if job_tx.send(repo).is_err() {
                        break;
                    }
                    while let Ok(outcome) = result_rx.try_recv() {
                        self.fold_outcome(outcome, aggregator);
                    }
                }
            }
            Err(err) => self.sink.emit(ScanEvent::warn(format!(
                "cannot walk volume {}: {err}",
                volume.path.display()
            ))),
        }

        self.sink.emit(ScanEvent::VolumeFinished {
            path: volume.path.clone(),
            repositories,
            unreadable_dirs: walker.stats().dirs_unreadable(),
        });
        self.observer.on_unit_done(&unit);
    }

    fn fold_outcome(&self, outcome: RepoOutcome, aggregator: &mut SummaryAggregator) {
        let RepoOutcome {
            repo,
            findings,
            issues,
        } = outcome;
        for finding in &findings {
            aggregator.record_finding(finding);
            self.sink.emit(ScanEvent::Finding(finding.clone()));
        }
        for issue in &issues {
            aggregator.record_issue(issue);
            self.sink.emit(ScanEvent::CheckIssue(issue.clone()));
        }
        if !findings.is_empty() {
            self.sink.emit(ScanEvent::FindingsBlock {
                repo_path: repo.root_path.clone(),
                lines: findings.iter().map(Finding::display_line).collect(),
            });
        }
        self.sink.emit(ScanEvent::RepositoryChecked {
            repo_path: repo.root_path.clone(),
            findings: findings.len(),
            issues: issues.len(),
        });
        self.observer
            .on_unit_done(&ScanUnit::Repository(repo.root_path));
    }

    fn advance(&mut self, next: ScanPhase) {
        if self.phase == next {
            return;
        }
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal scan phase transition {:?} -> {next:?}",
            self.phase
        );
        self.phase = next;
        self.observer.on_phase(next);
    }
}

fn worker_loop(
    jobs: &channel::Receiver<Repository>,
    results: &channel::Sender<RepoOutcome>,
    matchers: &MatcherSet,
    options: &InventoryOptions,
    cancel: &CancelToken,
) {
    for repo in jobs {
        let outcome = check_repository(repo, matchers, options, cancel);
        if results.send(outcome).is_err() {
            return;
        }
    }
}

/// Inventory one repository and run every matcher against it.
pub fn check_repository(
    repo: Repository,
    matchers: &MatcherSet,
    options: &InventoryOptions,
    cancel: &CancelToken,
) -> RepoOutcome {
    let mut inventory = inventory_repository(&repo, options, cancel);
    let mut report = MatchReport {
        findings: Vec::new(),
        issues: std::mem::take(&mut inventory.issues),
    };
    if !cancel.is_cancelled() {
        report.merge(matchers.check(&RepoContext {
            repo: &repo,
            inventory: &inventory,
            cancel,
        }));
    }
    RepoOutcome {
        repo,
        findings: report.findings,
        issues: report.issues,
    }
}
