//! Integration tests: CLI smoke tests and full-pipeline scan scenarios.

mod common;

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use shai_hulud_scanner::core::config::DenylistsConfig;
use shai_hulud_scanner::denylist::Denylist;
use shai_hulud_scanner::logger::dispatch::{LoggerConfig, spawn_logger};
use shai_hulud_scanner::logger::jsonl::JsonlConfig;
use shai_hulud_scanner::platform::pal::MockPlatform;
use shai_hulud_scanner::scanner::events::{
    CancelToken, MemorySink, ScanEvent, ScanEventSink, TeeSink,
};
use shai_hulud_scanner::scanner::finding::{
    CheckKind, FindingCategory, IssueOutcome, ScanSummary, ScanVerdict,
};
use shai_hulud_scanner::scanner::git::{GitCli, RemoteBranchLister, RemoteHeads};
use shai_hulud_scanner::scanner::orchestrator::ScanOrchestrator;
use shai_hulud_scanner::scanner::walker::Repository;
use tempfile::TempDir;

use common::MockLister;

fn run_scan(
    config: shai_hulud_scanner::core::config::Config,
    lister: MockLister,
) -> (ScanSummary, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = ScanOrchestrator::new(
        config,
        Arc::new(MockPlatform::default()),
        Arc::new(lister),
        sink.clone(),
    );
    let summary = orchestrator.run().expect("scan should complete");
    (summary, sink)
}

// ──────────────────── CLI smoke tests ────────────────────

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: shs [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn subcommand_help_flags_work() {
    for sub in ["scan", "denylists", "volumes", "config", "completions"] {
        let result = common::run_cli_case(&format!("help_{sub}"), &[sub, "--help"]);
        assert!(
            result.status.success(),
            "{sub} --help failed; log: {}",
            result.log_path.display()
        );
    }
}

#[test]
fn denylists_command_reports_counts_as_json() {
    let tmp = TempDir::new().unwrap();
    let lists = common::write_denylists(tmp.path());
    let config_path = tmp.path().join("config.toml");
    fs::write(&config_path, "").unwrap();
    let result = common::run_cli_case(
        "denylists_command_reports_counts_as_json",
        &[
            "--config",
            config_path.to_str().unwrap(),
            "--json",
            "denylists",
            "--hashes",
            lists.hashes.to_str().unwrap(),
            "--filenames",
            lists.filenames.to_str().unwrap(),
            "--packages",
            lists.packages.to_str().unwrap(),
        ],
    );
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    let payload: Value = serde_json::from_str(result.stdout.trim()).unwrap();
    assert_eq!(payload["command"], "denylists");
    assert_eq!(payload["total_entries"], 4);
}

#[test]
fn empty_denylist_exits_with_user_error() {
    let tmp = TempDir::new().unwrap();
    let lists = common::write_denylists(tmp.path());
    fs::write(&lists.packages, "# nothing yet\n\n").unwrap();
    let config_path = tmp.path().join("config.toml");
    fs::write(&config_path, "").unwrap();
    let result = common::run_cli_case(
        "empty_denylist_exits_with_user_error",
        &[
            "--config",
            config_path.to_str().unwrap(),
            "denylists",
            "--hashes",
            lists.hashes.to_str().unwrap(),
            "--filenames",
            lists.filenames.to_str().unwrap(),
            "--packages",
            lists.packages.to_str().unwrap(),
        ],
    );
    assert_eq!(
        result.status.code(),
        Some(1),
        "log: {}",
        result.log_path.display()
    );
    assert!(result.stderr.contains("SHS-1302"));
}

#[test]
#[cfg(target_os = "linux")]
fn scan_command_exits_four_when_indicators_found() {
    if !common::git_available() {
        eprintln!("skipping: git not available");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let volume = tmp.path().join("volume");
    common::two_repo_volume(&volume);
    let lists = common::write_denylists(tmp.path());
    let config_path = tmp.path().join("config.toml");
    fs::write(&config_path, "").unwrap();

    let result = common::run_cli_case(
        "scan_command_exits_four_when_indicators_found",
        &[
            "--config",
            config_path.to_str().unwrap(),
            "--json",
            "scan",
            volume.to_str().unwrap(),
            "--no-log",
            "--hashes",
            lists.hashes.to_str().unwrap(),
            "--filenames",
            lists.filenames.to_str().unwrap(),
            "--packages",
            lists.packages.to_str().unwrap(),
            "--parallelism",
            "2",
        ],
    );
    assert_eq!(
        result.status.code(),
        Some(4),
        "log: {}",
        result.log_path.display()
    );
    let last = result.stdout.lines().last().unwrap_or_default();
    let payload: Value = serde_json::from_str(last).unwrap();
    assert_eq!(payload["verdict"], "compromised");
    assert_eq!(payload["summary"]["repository_count"], 2);
    assert_eq!(payload["summary"]["high_count"], 1);
    assert_eq!(payload["summary"]["medium_count"], 1);
}

// ──────────────────── full-pipeline scenarios ────────────────────

#[test]
fn two_repository_volume_yields_expected_counts() {
    let tmp = TempDir::new().unwrap();
    let volume = tmp.path().join("volume");
    let (_, infected) = common::two_repo_volume(&volume);
    let lists = common::write_denylists(tmp.path());

    let (summary, sink) = run_scan(common::scan_config(&volume, lists), MockLister::clean());

    assert_eq!(summary.drive_count, 1);
    assert_eq!(summary.repository_count, 2);
    assert_eq!(summary.high_count, 1);
    assert_eq!(summary.medium_count, 1);
    assert_eq!(summary.low_count, 0);
    assert_eq!(summary.incomplete_checks, 0);
    assert_eq!(summary.verdict(), ScanVerdict::Compromised);

    let findings = sink.findings();
    assert!(findings.iter().all(|f| f.repo_path.ends_with("work/infected-app")));
    let hash = findings
        .iter()
        .find(|f| f.category == FindingCategory::FileHash)
        .expect("hash finding");
    assert_eq!(hash.path.as_deref(), Some(infected.join("dist/bundle.js").as_path()));
    assert!(findings
        .iter()
        .any(|f| f.category == FindingCategory::PackageManifest && f.detail.contains("left-pad@1.3.0")));
}

#[test]
fn volumes_from_platform_are_scanned_when_no_roots_given() {
    let tmp = TempDir::new().unwrap();
    let vol_a = tmp.path().join("a");
    let vol_b = tmp.path().join("b");
    common::make_repo(&vol_a, "one");
    common::make_repo(&vol_b, "two");
    let lists = common::write_denylists(tmp.path());
    let mut config = common::scan_config(&vol_a, lists);
    config.scanner.roots.clear();

    let platform = MockPlatform::with_local_roots(&[vol_a, vol_b]);
    let mut orchestrator = ScanOrchestrator::new(
        config,
        Arc::new(platform),
        Arc::new(MockLister::clean()),
        Arc::new(MemorySink::new()),
    );
    let summary = orchestrator.run().unwrap();
    assert_eq!(summary.drive_count, 2);
    assert_eq!(summary.repository_count, 2);
    assert_eq!(summary.verdict(), ScanVerdict::Clean);
}

#[test]
fn unreachable_remote_does_not_abort_scan() {
    let tmp = TempDir::new().unwrap();
    let volume = tmp.path().join("volume");
    common::two_repo_volume(&volume);
    common::make_repo(&volume, "offline/broken");
    let lists = common::write_denylists(tmp.path());

    let lister = MockLister {
        branches: vec!["main".to_string()],
        unreachable: vec!["offline/broken".to_string()],
    };
    let (summary, sink) = run_scan(common::scan_config(&volume, lists), lister);

    assert_eq!(summary.repository_count, 3);
    assert_eq!(summary.high_count, 1);
    assert_eq!(summary.medium_count, 1);
    assert_eq!(summary.incomplete_checks, 1);

    let issues = sink.issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].check, CheckKind::Branch);
    assert_eq!(issues[0].outcome, IssueOutcome::Failed);
    assert!(issues[0].repo_path.ends_with("offline/broken"));
}

#[test]
fn failed_check_makes_clean_scan_inconclusive() {
    let tmp = TempDir::new().unwrap();
    let volume = tmp.path().join("volume");
    common::make_repo(&volume, "only");
    let lists = common::write_denylists(tmp.path());
    let lister = MockLister {
        branches: Vec::new(),
        unreachable: vec!["only".to_string()],
    };
    let (summary, _) = run_scan(common::scan_config(&volume, lists), lister);
    assert_eq!(summary.total_findings(), 0);
    assert_eq!(summary.verdict(), ScanVerdict::Inconclusive);
}

#[test]
fn malicious_branch_is_high_finding() {
    let tmp = TempDir::new().unwrap();
    let volume = tmp.path().join("volume");
    common::make_repo(&volume, "app");
    let lists = common::write_denylists(tmp.path());
    let lister = MockLister {
        branches: vec!["main".to_string(), "shai-hulud".to_string()],
        unreachable: Vec::new(),
    };
    let (summary, sink) = run_scan(common::scan_config(&volume, lists), lister);
    assert_eq!(summary.high_count, 1);
    assert_eq!(sink.findings()[0].category, FindingCategory::Branch);
}

#[test]
fn lockfile_and_filename_indicators_are_medium() {
    let tmp = TempDir::new().unwrap();
    let volume = tmp.path().join("volume");
    let repo = common::make_repo(&volume, "app");
    common::write_file(
        &repo.join("package-lock.json"),
        "{\n  \"packages\": {\n    \"node_modules/left-pad\": {\n      \"version\": \"1.3.0\"\n    }\n  }\n}\n",
    );
    common::write_file(&repo.join(".github/workflows/shai-hulud-workflow.yml"), "on: push\n");
    let lists = common::write_denylists(tmp.path());

    let (summary, sink) = run_scan(common::scan_config(&volume, lists), MockLister::clean());
    assert_eq!(summary.medium_count, 2);
    assert_eq!(summary.high_count, 0);
    let categories: Vec<_> = sink.findings().iter().map(|f| f.category).collect();
    assert!(categories.contains(&FindingCategory::PackageLockfile));
    assert!(categories.contains(&FindingCategory::Filename));
}

#[test]
fn malformed_fixture_manifest_is_never_parsed() {
    let tmp = TempDir::new().unwrap();
    let volume = tmp.path().join("volume");
    let repo = common::make_repo(&volume, "app");
    common::write_file(&repo.join("test/malformed/package.json"), "{ not json");
    common::write_file(&repo.join("broken/package.json"), "{ also not json");
    let lists = common::write_denylists(tmp.path());

    let (summary, sink) = run_scan(common::scan_config(&volume, lists), MockLister::clean());
    let issues = sink.issues();
    assert_eq!(issues.len(), 1, "only the unmarked manifest is reported");
    assert_eq!(issues[0].check, CheckKind::Manifest);
    assert!(issues[0].path.as_ref().unwrap().ends_with("broken/package.json"));
    assert_eq!(summary.incomplete_checks, 1);
}

#[test]
fn nested_repository_is_checked_on_its_own() {
    let tmp = TempDir::new().unwrap();
    let volume = tmp.path().join("volume");
    let outer = common::make_repo(&volume, "outer");
    let inner = common::make_repo(&outer, "vendor/inner");
    common::write_file(&inner.join("lib/bundle.js"), common::MALICIOUS_JS);
    let lists = common::write_denylists(tmp.path());

    let (summary, sink) = run_scan(common::scan_config(&volume, lists), MockLister::clean());
    assert_eq!(summary.repository_count, 2);
    assert_eq!(summary.high_count, 1, "the payload is counted once");
    assert!(sink.findings()[0].repo_path.ends_with("vendor/inner"));
}

#[test]
fn repeated_scans_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let volume = tmp.path().join("volume");
    common::two_repo_volume(&volume);
    common::make_repo(&volume, "more/third");
    let lists = common::write_denylists(tmp.path());

    let (first, _) = run_scan(
        common::scan_config(&volume, lists.clone()),
        MockLister::clean(),
    );
    let (second, _) = run_scan(common::scan_config(&volume, lists), MockLister::clean());
    assert_eq!(first, second);
}

#[test]
fn summary_is_the_last_event() {
    let tmp = TempDir::new().unwrap();
    let volume = tmp.path().join("volume");
    common::two_repo_volume(&volume);
    let lists = common::write_denylists(tmp.path());

    let (summary, sink) = run_scan(common::scan_config(&volume, lists), MockLister::clean());
    let events = sink.events();
    assert!(matches!(events.first(), Some(ScanEvent::ScanStarted { .. })));
    assert_eq!(events.last(), Some(&ScanEvent::Summary(summary)));
    let loaded = events
        .iter()
        .filter(|e| matches!(e, ScanEvent::DenylistLoaded { .. }))
        .count();
    assert_eq!(loaded, 3);
}

#[test]
fn missing_denylist_file_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let volume = tmp.path().join("volume");
    common::make_repo(&volume, "app");
    let mut lists = common::write_denylists(tmp.path());
    lists.filenames = tmp.path().join("absent.txt");

    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = ScanOrchestrator::new(
        common::scan_config(&volume, lists),
        Arc::new(MockPlatform::default()),
        Arc::new(MockLister::clean()),
        sink.clone(),
    );
    let err = orchestrator.run().unwrap_err();
    assert_eq!(err.code(), "SHS-3002");
    assert!(sink.findings().is_empty());
}

#[test]
fn scan_deadline_cancels_and_still_summarizes() {
    let tmp = TempDir::new().unwrap();
    let volume = tmp.path().join("volume");
    common::two_repo_volume(&volume);
    let lists = common::write_denylists(tmp.path());

    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = ScanOrchestrator::new(
        common::scan_config(&volume, lists),
        Arc::new(MockPlatform::default()),
        Arc::new(MockLister::clean()),
        sink.clone(),
    )
    .with_cancel(CancelToken::new().with_deadline(Some(Duration::ZERO)));
    let summary = orchestrator.run().unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.verdict(), ScanVerdict::Inconclusive);
}

#[test]
fn logs_receive_full_scan_record() {
    let tmp = TempDir::new().unwrap();
    let volume = tmp.path().join("volume");
    common::two_repo_volume(&volume);
    let lists = common::write_denylists(tmp.path());
    let jsonl_path = tmp.path().join("logs/scan.jsonl");
    let text_path = tmp.path().join("logs/scan.log");

    let (handle, join) = spawn_logger(LoggerConfig {
        jsonl: Some(JsonlConfig {
            path: jsonl_path.clone(),
            fallback_path: None,
            ..JsonlConfig::default()
        }),
        text_path: Some(text_path.clone()),
        channel_capacity: 256,
    })
    .unwrap();
    let memory = Arc::new(MemorySink::new());
    let sinks: Vec<Box<dyn ScanEventSink>> =
        vec![Box::new(handle.clone()), Box::new(Arc::clone(&memory))];
    let tee = TeeSink::new(sinks);

    let mut orchestrator = ScanOrchestrator::new(
        common::scan_config(&volume, lists),
        Arc::new(MockPlatform::default()),
        Arc::new(MockLister::clean()),
        Arc::new(tee),
    );
    let summary = orchestrator.run().unwrap();
    handle.shutdown();
    join.join().unwrap();

    let jsonl = fs::read_to_string(&jsonl_path).unwrap();
    let last: Value = serde_json::from_str(jsonl.lines().last().unwrap()).unwrap();
    assert_eq!(last["event"], "summary");
    assert_eq!(last["summary"]["high_count"], summary.high_count);
    let finding_lines = jsonl
        .lines()
        .filter(|line| line.contains("\"event\":\"finding\""))
        .count();
    assert_eq!(finding_lines, 2);

    let text = fs::read_to_string(&text_path).unwrap();
    assert!(text.contains("2 finding(s) in"));
    assert!(text.contains("repositories checked: 2"));
    assert_eq!(memory.findings().len(), 2);
}

#[test]
fn denylist_loads_from_flat_files() {
    let tmp = TempDir::new().unwrap();
    let lists = common::write_denylists(tmp.path());
    let load = Denylist::load(&lists).unwrap();
    assert_eq!(load.denylist.hash_count(), 1);
    assert_eq!(load.denylist.filename_patterns().len(), 1);
    assert_eq!(load.denylist.packages().len(), 2);
    assert!(load.denylist.contains_hash(&common::sha256_hex(common::MALICIOUS_JS).to_uppercase()));
    assert_eq!(load.rejected().count(), 0);
}

#[test]
fn unsupported_denylist_format_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let mut lists = common::write_denylists(tmp.path());
    let json_list = tmp.path().join("packages.json");
    fs::write(&json_list, "[\"left-pad:1.3.0\"]").unwrap();
    lists.packages = json_list;
    let err = Denylist::load(&lists).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.code(), "SHS-1301");
}

// ──────────────────── real git ────────────────────

fn git(dir: &std::path::Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.email=test@example.com", "-c", "user.name=test"])
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("run git");
    assert!(
        status.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&status.stderr)
    );
}

#[test]
fn git_cli_lists_remote_heads_from_local_origin() {
    if !common::git_available() {
        eprintln!("skipping: git not available");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let remote = tmp.path().join("remote.git");
    fs::create_dir_all(&remote).unwrap();
    git(&remote, &["init", "--bare", "-q"]);

    let work = tmp.path().join("work");
    fs::create_dir_all(&work).unwrap();
    git(&work, &["init", "-q"]);
    common::write_file(&work.join("README.md"), "hello\n");
    git(&work, &["add", "README.md"]);
    git(&work, &["commit", "-q", "-m", "init"]);
    git(&work, &["remote", "add", "origin", remote.to_str().unwrap()]);
    git(&work, &["push", "-q", "origin", "HEAD:refs/heads/main"]);
    git(&work, &["push", "-q", "origin", "HEAD:refs/heads/shai-hulud"]);

    let lister = GitCli::new("git", "origin", Duration::from_secs(30));
    assert!(lister.ensure_available().unwrap().starts_with("git version"));
    let repo = Repository::from_control_dir(work.join(".git")).unwrap();
    let heads = lister.head_branches(&repo, &CancelToken::new()).unwrap();
    let RemoteHeads::Branches(mut branches) = heads else {
        panic!("expected branches, got {heads:?}");
    };
    branches.sort();
    assert_eq!(branches, vec!["main".to_string(), "shai-hulud".to_string()]);

    // A remote declared only through an included file is still found.
    let included = tmp.path().join("included");
    fs::create_dir_all(&included).unwrap();
    git(&included, &["init", "-q"]);
    common::write_file(
        &included.join(".git/remotes.inc"),
        format!("[remote \"origin\"]\n\turl = {}\n", remote.display()),
    );
    git(&included, &["config", "include.path", "remotes.inc"]);
    let repo = Repository::from_control_dir(included.join(".git")).unwrap();
    let heads = lister.head_branches(&repo, &CancelToken::new()).unwrap();
    let RemoteHeads::Branches(mut branches) = heads else {
        panic!("expected branches through include, got {heads:?}");
    };
    branches.sort();
    assert_eq!(branches, vec!["main".to_string(), "shai-hulud".to_string()]);

    let lonely = tmp.path().join("lonely");
    fs::create_dir_all(&lonely).unwrap();
    git(&lonely, &["init", "-q"]);
    let repo = Repository::from_control_dir(lonely.join(".git")).unwrap();
    assert_eq!(
        lister.head_branches(&repo, &CancelToken::new()).unwrap(),
        RemoteHeads::NoRemote
    );
}

#[test]
fn missing_git_binary_is_fatal_setup_error() {
    let lister = GitCli::new(
        PathBuf::from("/nonexistent/shs-test/git"),
        "origin",
        Duration::from_secs(5),
    );
    let err = lister.ensure_available().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.code(), "SHS-1201");
}

#[test]
fn default_denylist_paths_live_under_config_dir() {
    let defaults = DenylistsConfig::default();
    for path in [&defaults.hashes, &defaults.filenames, &defaults.packages] {
        assert!(path.to_string_lossy().contains("shs/denylists"));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("txt"));
    }
}
