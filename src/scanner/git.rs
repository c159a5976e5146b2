//! Source-control subprocess access for the branch matcher.
//!
//! All commands are read-only: `git --version` as a preflight,
//! `git -C <root> config --get remote.<name>.url` when the remote is not
//! plainly declared in `.git/config`, and `git -C <root> ls-remote --heads
//! <remote>` per repository. Every
//! invocation runs with a deadline and honors the scan's [`CancelToken`].

#![allow(missing_docs)]

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::core::errors::{Result, ShsError};
use crate::scanner::events::CancelToken;
use crate::scanner::walker::Repository;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Branch names advertised by a remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteHeads {
    /// The repository has no remote under the configured name.
    NoRemote,
    Branches(Vec<String>),
}

/// Query a repository's remote for its head branches.
pub trait RemoteBranchLister: Send + Sync {
    /// Fails with `ToolUnavailable` when the underlying tool cannot run.
    fn ensure_available(&self) -> Result<String>;

    fn head_branches(&self, repo: &Repository, cancel: &CancelToken) -> Result<RemoteHeads>;
}

/// [`RemoteBranchLister`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: PathBuf,
    remote: String,
    timeout: Duration,
}

impl GitCli {
    pub fn new(binary: impl Into<PathBuf>, remote: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            remote: remote.into(),
            timeout,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        // Never block on credential prompts or pagers.
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_ASKPASS", "")
            .env("SSH_ASKPASS", "")
            .env("GIT_SSH_COMMAND", "ssh -o BatchMode=yes")
            .env("GIT_PAGER", "cat")
            .stdin(Stdio::null());
        cmd
    }

    fn label(&self, args: &[&str]) -> String {
        format!("{} {}", self.binary.display(), args.join(" "))
    }

    fn run(&self, args: &[&str], cancel: &CancelToken) -> Result<(String, CommandOutput)> {
        let label = self.label(args);
        let mut cmd = self.command();
        cmd.args(args);
        let timeout = cancel
            .remaining()
            .map_or(self.timeout, |left| left.min(self.timeout));
        let output = run_with_deadline(cmd, &label, timeout, cancel)?;
        Ok((label, output))
    }

    /// Ask git whether the remote exists; this resolves `include`/`includeIf`
    /// files and any syntax the plain-text check does not understand.
    fn remote_defined(&self, repo: &Repository, cancel: &CancelToken) -> Result<bool> {
        let root = repo.root_path.to_string_lossy();
        let key = format!("remote.{}.url", self.remote);
        let (label, output) = self.run(&["-C", &*root, "config", "--get", key.as_str()], cancel)?;
        match output.status.code() {
            Some(0) => Ok(true),
            // `git config --get` exits 1 when the key is unset.
            Some(1) => Ok(false),
            code => Err(ShsError::CommandFailed {
                command: label,
                exit_code: code.unwrap_or(-1),
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }
}

impl RemoteBranchLister for GitCli {
    fn ensure_available(&self) -> Result<String> {
        let mut cmd = self.command();
        cmd.arg("--version");
        let label = self.label(&["--version"]);
        let unavailable = |details: String| ShsError::ToolUnavailable {
            tool: self.binary.display().to_string(),
            details,
        };
        let output = run_with_deadline(cmd, &label, self.timeout, &CancelToken::new())
            .map_err(|err| unavailable(err.to_string()))?;
        if !output.status.success() {
            return Err(unavailable(format!(
                "exit {}: {}",
                output.status.code().unwrap_or(-1),
                output.stderr.trim()
            )));
        }
        Ok(output.stdout.trim().to_string())
    }

    fn head_branches(&self, repo: &Repository, cancel: &CancelToken) -> Result<RemoteHeads> {
        if remote_configured(&repo.control_dir, &self.remote) != Some(true)
            && !self.remote_defined(repo, cancel)?
        {
            return Ok(RemoteHeads::NoRemote);
        }

        let root = repo.root_path.to_string_lossy();
        let (label, output) = self.run(
            &["-C", &*root, "ls-remote", "--heads", self.remote.as_str()],
            cancel,
        )?;
        if !output.status.success() {
            return Err(ShsError::CommandFailed {
                command: label,
                exit_code: output.status.code().unwrap_or(-1),
                stderr: output.stderr.trim().to_string(),
            });
        }
        parse_ls_remote_heads(&output.stdout)
            .map(RemoteHeads::Branches)
            .map_err(|details| ShsError::CommandOutput {
                command: label,
                details,
            })
    }
}

/// Whether a `[remote "<name>"]` section header appears in the repository
/// config. Section names are case-insensitive, the remote name is not.
///
/// `None` when the config cannot be read. `Some(false)` only means the file
/// does not declare it directly; includes are not followed.
#[must_use]
pub fn remote_configured(control_dir: &Path, remote: &str) -> Option<bool> {
    let raw = fs::read_to_string(control_dir.join("config")).ok()?;
    let quoted = format!("\"{remote}\"");
    Some(raw.lines().any(|line| {
        let Some(header) = line
            .trim_start()
            .strip_prefix('[')
            .and_then(|rest| rest.split_once(']'))
            .map(|(inside, _)| inside.trim())
        else {
            return false;
        };
        header.split_once(char::is_whitespace).is_some_and(|(section, name)| {
            section.eq_ignore_ascii_case("remote") && name.trim() == quoted
        })
    }))
}

/// Parse `ls-remote --heads` output into branch names.
///
/// Each line is `<object-id>\trefs/heads/<branch>`. Anything else is an error.
pub fn parse_ls_remote_heads(stdout: &str) -> std::result::Result<Vec<String>, String> {
    let mut branches = Vec::new();
    for line in stdout.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        let Some((oid, reference)) = line.split_once('\t') else {
            return Err(format!("missing tab separator in {line:?}"));
        };
        if oid.is_empty() || !oid.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("invalid object id in {line:?}"));
        }
        let Some(branch) = reference.strip_prefix("refs/heads/") else {
            return Err(format!("unexpected ref {reference:?}"));
        };
        if branch.is_empty() {
            return Err(format!("empty branch name in {line:?}"));
        }
        branches.push(branch.to_string());
    }
    Ok(branches)
}

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Spawn `cmd`, wait at most `timeout`, and kill it on expiry or cancellation.
pub fn run_with_deadline(
    mut cmd: Command,
    label: &str,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<CommandOutput> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|source| ShsError::Io {
        path: PathBuf::from(cmd.get_program()),
        source,
    })?;

    // Drain pipes on their own threads so a chatty child cannot deadlock on a full pipe.
    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ShsError::Io {
                    path: PathBuf::from(cmd.get_program()),
                    source,
                });
            }
        }
        if cancel.is_cancelled() || started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            if cancel.is_cancelled() {
                return Err(ShsError::Cancelled);
            }
            return Err(ShsError::CommandTimeout {
                command: label.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(CommandOutput {
        status,
        stdout: join_reader(stdout_reader),
        stderr: join_reader(stderr_reader),
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
