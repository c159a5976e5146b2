//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ShsError};
use crate::core::paths::expand_home;

/// Full scanner configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub denylists: DenylistsConfig,
    pub scanner: ScannerConfig,
    pub matchers: MatchersConfig,
    pub paths: PathsConfig,
}

/// Locations of the three flat-line denylists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DenylistsConfig {
    pub hashes: PathBuf,
    pub filenames: PathBuf,
    pub packages: PathBuf,
}

/// Repository discovery and scheduling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    /// Explicit scan roots. Empty means "every eligible local volume".
    pub roots: Vec<PathBuf>,
    pub excluded_paths: Vec<PathBuf>,
    pub max_depth: usize,
    /// Repository worker pool size; also the walker thread count.
    pub parallelism: usize,
    pub follow_symlinks: bool,
    pub cross_devices: bool,
    /// Whole-scan deadline in seconds. 0 disables it.
    pub scan_deadline_secs: u64,
}

/// Matcher knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MatchersConfig {
    pub git_binary: PathBuf,
    pub remote_name: String,
    /// Regex tested against every remote head branch name.
    pub branch_pattern: String,
    pub remote_timeout_secs: u64,
    pub manifest_names: Vec<String>,
    pub lockfile_names: Vec<String>,
    /// Manifests whose path contains one of these strings are never parsed.
    pub skip_path_markers: Vec<String>,
    /// Extensions (without the dot, matched case-insensitively) that get hashed.
    pub hash_extensions: Vec<String>,
}

/// Log sink locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
    pub text_log: PathBuf,
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[SHS-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

impl Default for DenylistsConfig {
    fn default() -> Self {
        let dir = home_dir().join(".config").join("shs").join("denylists");
        Self {
            hashes: dir.join("hashes.txt"),
            filenames: dir.join("filenames.txt"),
            packages: dir.join("packages.txt"),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            excluded_paths: vec![
                PathBuf::from("/proc"),
                PathBuf::from("/sys"),
                PathBuf::from("/dev"),
                PathBuf::from("/run"),
            ],
            max_depth: 64,
            parallelism: std::thread::available_parallelism().map_or(2, |n| n.get().max(1)),
            follow_symlinks: false,
            cross_devices: false,
            scan_deadline_secs: 0,
        }
    }
}

impl Default for MatchersConfig {
    fn default() -> Self {
        Self {
            git_binary: PathBuf::from("git"),
            remote_name: "origin".to_string(),
            branch_pattern: "shai-hulud".to_string(),
            remote_timeout_secs: 30,
            manifest_names: vec!["package.json".to_string()],
            lockfile_names: vec!["package-lock.json".to_string()],
            skip_path_markers: vec!["malformed".to_string()],
            hash_extensions: vec!["js".to_string()],
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = home_dir();
        let data = home.join(".local").join("share").join("shs");
        Self {
            config_file: home.join(".config").join("shs").join("config.toml"),
            jsonl_log: data.join("scan.jsonl"),
            text_log: data.join("scan.log"),
        }
    }
}

impl ScannerConfig {
    /// Whole-scan deadline, if configured.
    #[must_use]
    pub fn scan_deadline(&self) -> Option<Duration> {
        (self.scan_deadline_secs > 0).then(|| Duration::from_secs(self.scan_deadline_secs))
    }
}

impl MatchersConfig {
    #[must_use]
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| ShsError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(ShsError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the scan-start log line.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // denylists
        if let Some(raw) = lookup("SHS_DENYLISTS_HASHES") {
            self.denylists.hashes = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SHS_DENYLISTS_FILENAMES") {
            self.denylists.filenames = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SHS_DENYLISTS_PACKAGES") {
            self.denylists.packages = PathBuf::from(raw);
        }

        // scanner
        if let Some(raw) = lookup("SHS_SCANNER_MAX_DEPTH") {
            self.scanner.max_depth = parse_env("SHS_SCANNER_MAX_DEPTH", &raw)?;
        }
        if let Some(raw) = lookup("SHS_SCANNER_PARALLELISM") {
            self.scanner.parallelism = parse_env("SHS_SCANNER_PARALLELISM", &raw)?;
        }
        if let Some(raw) = lookup("SHS_SCANNER_FOLLOW_SYMLINKS") {
            self.scanner.follow_symlinks = parse_env("SHS_SCANNER_FOLLOW_SYMLINKS", &raw)?;
        }
        if let Some(raw) = lookup("SHS_SCANNER_CROSS_DEVICES") {
            self.scanner.cross_devices = parse_env("SHS_SCANNER_CROSS_DEVICES", &raw)?;
        }
        if let Some(raw) = lookup("SHS_SCANNER_SCAN_DEADLINE_SECS") {
            self.scanner.scan_deadline_secs = parse_env("SHS_SCANNER_SCAN_DEADLINE_SECS", &raw)?;
        }

        // matchers
        if let Some(raw) = lookup("SHS_MATCHERS_GIT_BINARY") {
            self.matchers.git_binary = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SHS_MATCHERS_REMOTE_NAME") {
            self.matchers.remote_name = raw;
        }
        if let Some(raw) = lookup("SHS_MATCHERS_BRANCH_PATTERN") {
            self.matchers.branch_pattern = raw;
        }
        if let Some(raw) = lookup("SHS_MATCHERS_REMOTE_TIMEOUT_SECS") {
            self.matchers.remote_timeout_secs =
                parse_env("SHS_MATCHERS_REMOTE_TIMEOUT_SECS", &raw)?;
        }

        // paths
        if let Some(raw) = lookup("SHS_PATHS_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SHS_PATHS_TEXT_LOG") {
            self.paths.text_log = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Expand `~/`, strip trailing slashes from roots.
    fn normalize_paths(&mut self) {
        for path in [
            &mut self.denylists.hashes,
            &mut self.denylists.filenames,
            &mut self.denylists.packages,
            &mut self.paths.jsonl_log,
            &mut self.paths.text_log,
        ] {
            *path = expand_home(path);
        }

        for path in self
            .scanner
            .roots
            .iter_mut()
            .chain(self.scanner.excluded_paths.iter_mut())
        {
            let expanded = expand_home(path);
            let s = expanded.to_string_lossy();
            *path = match s.strip_suffix('/') {
                Some(stripped) if s.len() > 1 => PathBuf::from(stripped),
                _ => expanded.clone(),
            };
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scanner.parallelism == 0 {
            return Err(ShsError::InvalidConfig {
                details: "scanner.parallelism must be >= 1".to_string(),
            });
        }
        if self.scanner.max_depth == 0 {
            return Err(ShsError::InvalidConfig {
                details: "scanner.max_depth must be >= 1".to_string(),
            });
        }
        if self.matchers.remote_timeout_secs == 0 {
            return Err(ShsError::InvalidConfig {
                details: "matchers.remote_timeout_secs must be > 0".to_string(),
            });
        }
        if self.matchers.remote_name.trim().is_empty() {
            return Err(ShsError::InvalidConfig {
                details: "matchers.remote_name must not be empty".to_string(),
            });
        }

        for (name, list) in [
            ("matchers.manifest_names", &self.matchers.manifest_names),
            ("matchers.lockfile_names", &self.matchers.lockfile_names),
            ("matchers.hash_extensions", &self.matchers.hash_extensions),
        ] {
            if list.is_empty() || list.iter().any(|item| item.trim().is_empty()) {
                return Err(ShsError::InvalidConfig {
                    details: format!("{name} must be a non-empty list of non-empty names"),
                });
            }
        }

        if let Some(shared) = self
            .matchers
            .manifest_names
            .iter()
            .find(|name| self.matchers.lockfile_names.contains(name))
        {
            return Err(ShsError::InvalidConfig {
                details: format!("{shared:?} cannot be both a manifest and a lockfile name"),
            });
        }

        regex::Regex::new(&self.matchers.branch_pattern).map_err(|err| {
            ShsError::InvalidConfig {
                details: format!(
                    "matchers.branch_pattern {:?} does not compile: {err}",
                    self.matchers.branch_pattern
                ),
            }
        })?;

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| ShsError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}
