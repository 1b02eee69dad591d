use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn quorum_lock() -> Command {
    let mut cmd = Command::cargo_bin("quorum-lock").unwrap();
    for var in [
        "REDLOCK_RETRY_COUNT",
        "REDLOCK_RETRY_DELAY_MS",
        "REDLOCK_DURATION_MS",
        "REDLOCK_NAME",
        "REDLOCK_DBNAME",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_settings_defaults_as_json() {
    let temp_dir = TempDir::new().unwrap();
    quorum_lock()
        .current_dir(temp_dir.path())
        .args(["settings", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"duration_ms\": 60000"))
        .stdout(predicate::str::contains("\"retry_count\": 10"));
}

#[test]
fn test_settings_from_file_and_environment() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("custom.toml");
    fs::write(&path, "retry_count = 0\nname = \"jobs\"\n").unwrap();

    quorum_lock()
        .env("REDLOCK_DBNAME", "billing")
        .args(["settings", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("unbounded").not())
        .stdout(predicate::str::contains("billing:jobs:"));
}

#[test]
fn test_missing_config_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    quorum_lock()
        .args(["settings", "--config"])
        .arg(temp_dir.path().join("absent.toml"))
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_simulate_contending_workers() {
    let temp_dir = TempDir::new().unwrap();
    quorum_lock()
        .current_dir(temp_dir.path())
        .args([
            "simulate",
            "--nodes",
            "3",
            "--workers",
            "2",
            "--hold-ms",
            "10",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"quorum_size\": 2"))
        .stdout(predicate::str::contains("\"status\": \"held\""))
        .stdout(predicate::str::contains("\"last_attempt\""));
}

#[test]
fn test_simulate_without_quorum() {
    let temp_dir = TempDir::new().unwrap();
    quorum_lock()
        .current_dir(temp_dir.path())
        .args([
            "simulate",
            "--nodes",
            "3",
            "--down",
            "2",
            "--workers",
            "1",
            "--retry-count",
            "0",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("no quorum"))
        .stdout(predicate::str::contains("0 of 1 workers held the lock"));
}

#[test]
fn test_simulate_rejects_impossible_layout() {
    let temp_dir = TempDir::new().unwrap();
    quorum_lock()
        .current_dir(temp_dir.path())
        .args(["simulate", "--nodes", "2", "--down", "2", "--slow", "1"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Validation error"));
}
