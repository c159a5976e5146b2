//! Parallel repository discovery and per-repository file inventory.
//!
//! Discovery walks a volume with a pool of worker threads and emits a
//! [`Repository`] for every directory holding a `.git` control directory
//! (matched case-insensitively). Unreadable subtrees are counted and skipped.
//! The walk never descends into control directories but does continue into
//! working trees, so nested repositories are found as well.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::errors::{Result, ShsError};
use crate::scanner::events::CancelToken;
use crate::scanner::finding::{CheckIssue, CheckKind};

/// Name of the source-control metadata directory.
pub const CONTROL_DIR_NAME: &str = ".git";

/// Walker configuration derived from `ScannerConfig`.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub root_paths: Vec<PathBuf>,
    pub max_depth: usize,
    pub follow_symlinks: bool,
    pub cross_devices: bool,
    pub parallelism: usize,
    pub excluded_paths: HashSet<PathBuf>,
}

/// A discovered source-control repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Repository {
    pub root_path: PathBuf,
    pub control_dir: PathBuf,
}

impl Repository {
    /// Build from the control directory; the root is its parent.
    #[must_use]
    pub fn from_control_dir(control_dir: PathBuf) -> Option<Self> {
        let root_path = control_dir.parent()?.to_path_buf();
        Some(Self {
            root_path,
            control_dir,
        })
    }
}

/// Counters shared by the walker threads.
#[derive(Debug, Default)]
pub struct WalkStats {
    dirs_visited: AtomicU64,
    dirs_unreadable: AtomicU64,
}

impl WalkStats {
    #[must_use]
    pub fn dirs_visited(&self) -> u64 {
        self.dirs_visited.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dirs_unreadable(&self) -> u64 {
        self.dirs_unreadable.load(Ordering::Relaxed)
    }
}

/// Item in the internal work queue: (directory_path, depth, root_device_id).
type WorkItem = (PathBuf, usize, u64);

/// Directory identity as (device, inode).
type DirId = (u64, u64);

/// Parallel repository locator.
///
/// Safety invariants:
/// - Honors `follow_symlinks` config during traversal
/// - Never crosses filesystem boundaries unless configured
/// - Skips excluded paths
/// - Bounded by `max_depth` to prevent runaway traversal
/// - Reads each directory once when following symlinks, so link cycles end
pub struct RepositoryWalker {
    config: WalkerConfig,
    cancel: CancelToken,
    stats: Arc<WalkStats>,
}

impl RepositoryWalker {
    pub fn new(config: WalkerConfig, cancel: CancelToken) -> Self {
        Self {
            config,
            cancel,
            stats: Arc::new(WalkStats::default()),
        }
    }

    /// Walk to completion and collect every repository found.
    pub fn walk(&self) -> Result<Vec<Repository>> {
        Ok(self.stream()?.into_iter().collect())
    }

    /// Stream repositories as they are discovered.
    ///
    /// The walk runs in background threads; the receiver disconnects once
    /// every reachable directory has been processed or the walk is cancelled.
    pub fn stream(&self) -> Result<channel::Receiver<Repository>> {
        let parallelism = self.config.parallelism.max(1);

        // Unbounded work queue: discovery must be exhaustive, so children are
        // never dropped under back-pressure.
        let (work_tx, work_rx) = channel::unbounded::<WorkItem>();
        let (result_tx, result_rx) = channel::unbounded::<Repository>();

        let in_flight = Arc::new(AtomicUsize::new(0));
        let visited: Arc<Mutex<HashSet<DirId>>> = Arc::new(Mutex::new(HashSet::new()));

        for root in &self.config.root_paths {
            let meta = match metadata_for_path(root, self.config.follow_symlinks) {
                Ok(m) => m,
                Err(err)
                    if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) =>
                {
                    self.stats.dirs_unreadable.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Err(err) => return Err(ShsError::io(root, err)),
            };
            if !meta.is_dir() {
                continue;
            }
            let dev = device_id(&meta);
            in_flight.fetch_add(1, Ordering::Release);
            if work_tx.send((root.clone(), 0, dev)).is_err() {
                in_flight.fetch_sub(1, Ordering::Release);
            }
        }

        for _ in 0..parallelism {
            let work_rx = work_rx.clone();
            let work_tx = work_tx.clone();
            let result_tx = result_tx.clone();
            let in_flight = Arc::clone(&in_flight);
            let config = self.config.clone();
            let cancel = self.cancel.clone();
            let stats = Arc::clone(&self.stats);
            let visited = Arc::clone(&visited);

            thread::spawn(move || {
                walker_thread(
                    &work_rx, &work_tx, &result_tx, &in_flight, &config, &cancel, &stats,
                    &visited,
                );
            });
        }

        Ok(result_rx)
    }

    #[must_use]
    pub fn stats(&self) -> Arc<WalkStats> {
        Arc::clone(&self.stats)
    }
}

#[allow(clippy::too_many_arguments)]
fn walker_thread(
    work_rx: &channel::Receiver<WorkItem>,
    work_tx: &channel::Sender<WorkItem>,
    result_tx: &channel::Sender<Repository>,
    in_flight: &AtomicUsize,
    config: &WalkerConfig,
    cancel: &CancelToken,
    stats: &WalkStats,
    visited: &Mutex<HashSet<DirId>>,
) {
    loop {
        match work_rx.recv_timeout(Duration::from_millis(50)) {
            Ok((dir_path, depth, root_dev)) => {
                // Once cancelled, queued items are drained without being read.
                if !cancel.is_cancelled() {
                    process_directory(
                        &dir_path, depth, root_dev, work_tx, result_tx, in_flight, config, stats,
                        visited,
                    );
                }
                in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            Err(channel::RecvTimeoutError::Timeout) => {
                if in_flight.load(Ordering::Acquire) == 0 {
                    return;
                }
            }
            Err(channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Read one directory: report a repository if it holds a control directory,
/// then enqueue every subdirectory except the control directory itself.
#[allow(clippy::too_many_arguments)]
fn process_directory(
    dir_path: &Path,
    depth: usize,
    root_dev: u64,
    work_tx: &channel::Sender<WorkItem>,
    result_tx: &channel::Sender<Repository>,
    in_flight: &AtomicUsize,
    config: &WalkerConfig,
    stats: &WalkStats,
    visited: &Mutex<HashSet<DirId>>,
) {
    if config.excluded_paths.contains(dir_path) {
        return;
    }

    let Ok(meta) = metadata_for_path(dir_path, config.follow_symlinks) else {
        stats.dirs_unreadable.fetch_add(1, Ordering::Relaxed);
        return;
    };
    // Cross-device guard for children queued without a per-child stat.
    if depth > 0 && !config.cross_devices && device_id(&meta) != root_dev {
        return;
    }
    // Symlink cycles: a directory already read under another path is skipped.
    if config.follow_symlinks
        && let Some(id) = dir_identity(&meta)
        && !visited.lock().insert(id)
    {
        return;
    }

    let entries = match fs::read_dir(dir_path) {
        Ok(entries) => entries,
        Err(_) => {
            stats.dirs_unreadable.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };
    stats.dirs_visited.fetch_add(1, Ordering::Relaxed);

    let mut pending_children: Vec<PathBuf> = Vec::new();
    for entry_result in entries {
        let Ok(entry) = entry_result else {
            continue;
        };
        let Ok(ft) = entry.file_type() else {
            continue;
        };
        if !config.follow_symlinks && ft.is_symlink() {
            continue;
        }
        let child_path = entry.path();
        let is_dir = if ft.is_symlink() {
            metadata_for_path(&child_path, true).is_ok_and(|m| m.is_dir())
        } else {
            ft.is_dir()
        };
        if !is_dir {
            continue;
        }

        if is_control_dir_name(&entry.file_name().to_string_lossy()) {
            let _ = result_tx.send(Repository {
                root_path: dir_path.to_path_buf(),
                control_dir: child_path,
            });
            continue;
        }

        if depth < config.max_depth && !config.excluded_paths.contains(&child_path) {
            pending_children.push(child_path);
        }
    }

    for child_path in pending_children {
        in_flight.fetch_add(1, Ordering::Release);
        if work_tx.send((child_path, depth + 1, root_dev)).is_err() {
            in_flight.fetch_sub(1, Ordering::Release);
        }
    }
}

/// Case-insensitive comparison against the control directory name.
#[must_use]
pub fn is_control_dir_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(CONTROL_DIR_NAME)
}

// ──────────────────── per-repository inventory ────────────────────

/// Regular files belonging to one repository's working tree.
#[derive(Debug, Clone, Default)]
pub struct RepoInventory {
    pub files: Vec<PathBuf>,
    pub issues: Vec<CheckIssue>,
    /// Set when the listing stopped early because the scan was cancelled.
    pub truncated: bool,
}

/// Options for [`inventory_repository`].
#[derive(Debug, Clone)]
pub struct InventoryOptions {
    pub max_depth: usize,
    pub follow_symlinks: bool,
    pub excluded_paths: HashSet<PathBuf>,
}

/// List every regular file in the working tree of `repo`.
///
/// Skips the control directory and any subdirectory that is itself a
/// repository root (those are inventoried as their own repositories).
/// Directories that cannot be read become [`CheckIssue`]s. Files are
/// returned sorted so matcher output is stable.
pub fn inventory_repository(
    repo: &Repository,
    options: &InventoryOptions,
    cancel: &CancelToken,
) -> RepoInventory {
    let mut inventory = RepoInventory::default();
    let mut stack: Vec<(PathBuf, usize)> = vec![(repo.root_path.clone(), 0)];
    let mut seen: HashSet<DirId> = HashSet::new();

    while let Some((dir, depth)) = stack.pop() {
        if cancel.is_cancelled() {
            inventory.truncated = true;
            break;
        }
        if options.follow_symlinks
            && let Some(id) = fs::metadata(&dir).ok().as_ref().and_then(dir_identity)
            && !seen.insert(id)
        {
            continue;
        }

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                inventory.issues.push(
                    CheckIssue::failed(
                        CheckKind::Inventory,
                        &repo.root_path,
                        format!("unreadable directory: {err}"),
                    )
                    .with_path(dir),
                );
                continue;
            }
        };

        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        let mut is_nested_root = false;
        for entry_result in entries {
            let Ok(entry) = entry_result else {
                continue;
            };
            let Ok(ft) = entry.file_type() else {
                continue;
            };
            if ft.is_symlink() && !options.follow_symlinks {
                continue;
            }
            let path = entry.path();
            let (is_dir, is_file) = if ft.is_symlink() {
                match fs::metadata(&path) {
                    Ok(meta) => (meta.is_dir(), meta.is_file()),
                    Err(_) => continue,
                }
            } else {
                (ft.is_dir(), ft.is_file())
            };

            if is_dir {
                if is_control_dir_name(&entry.file_name().to_string_lossy()) {
                    if depth > 0 {
                        is_nested_root = true;
                        break;
                    }
                    continue;
                }
                if depth < options.max_depth && !options.excluded_paths.contains(&path) {
                    subdirs.push(path);
                }
            } else if is_file {
                files.push(path);
            }
        }

        if is_nested_root {
            continue;
        }
        inventory.files.extend(files);
        stack.extend(subdirs.into_iter().map(|p| (p, depth + 1)));
    }

    inventory.files.sort();
    inventory
}

fn metadata_for_path(path: &Path, follow_symlinks: bool) -> std::io::Result<fs::Metadata> {
    if follow_symlinks {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    }
}

/// Get device ID from metadata (for cross-device detection).
fn device_id(meta: &fs::Metadata) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        meta.dev()
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        0
    }
}

/// (device, inode) of a directory; `None` where the platform has no inodes.
fn dir_identity(meta: &fs::Metadata) -> Option<DirId> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Some((meta.dev(), meta.ino()))
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        None
    }
}
