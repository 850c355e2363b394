//! CLI 통합 테스트 - `dashdeep` 바이너리 직접 실행
//!
//! `cargo test -p dashdeep-cli --test cli_test`

#![cfg(unix)]

use std::process::{Command, Output};
use tempfile::TempDir;

/// Run `dashdeep` with config lookups confined to a scratch directory
fn dashdeep(scratch: &TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dashdeep"))
        .args(args)
        .current_dir(scratch.path())
        .env("HOME", scratch.path())
        .env("XDG_CONFIG_HOME", scratch.path().join("config"))
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run dashdeep")
}

#[test]
fn test_run_prints_json_records() {
    let scratch = tempfile::tempdir().unwrap();
    let output = dashdeep(
        &scratch,
        &[
            "run", "sleep", "--arg", "seconds=0", "--arg", "value=7", "-n", "2", "--json",
        ],
    );
    assert!(output.status.success(), "{:?}", output);

    let records: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 2);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record["id"], i);
        assert_eq!(record["state"], "finished");
        assert_eq!(record["error_description"], "None");
        assert_eq!(record["result"], 7);
    }
}

#[test]
fn test_failed_job_exits_nonzero() {
    let scratch = tempfile::tempdir().unwrap();
    let output = dashdeep(&scratch, &["run", "fail", "--json"]);
    assert!(!output.status.success());

    let records: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(records[0]["state"], "failed");
    assert_eq!(records[0]["error_description"], "ValueError: boom");
}

#[test]
fn test_project_config_sets_capacity() {
    let scratch = tempfile::tempdir().unwrap();
    let dir = scratch.path().join(".dashdeep");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("config.json"),
        r#"{ "pool": { "maxWorkers": 1 }, "monitor": { "pollIntervalMs": 50 } }"#,
    )
    .unwrap();

    let output = dashdeep(
        &scratch,
        &["run", "sleep", "--args", r#"{"seconds": 0.1}"#, "-n", "2", "--json"],
    );
    assert!(output.status.success(), "{:?}", output);

    let records: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let pids: Vec<_> = records
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["pid"].as_u64().unwrap())
        .collect();
    assert_eq!(pids.len(), 2);
    assert_ne!(pids[0], pids[1]);
}

#[test]
fn test_unknown_job_is_rejected() {
    let scratch = tempfile::tempdir().unwrap();
    let output = dashdeep(&scratch, &["run", "no-such-job"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown job"));
}

#[test]
fn test_jobs_lists_builtins() {
    let scratch = tempfile::tempdir().unwrap();
    let output = dashdeep(&scratch, &["jobs"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["sleep", "fail", "spawn-children", "dummy-train"] {
        assert!(stdout.contains(name), "missing {}", name);
    }
}
