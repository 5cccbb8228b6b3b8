//! Command line tests for the docket binary.
//!
//! These only cover paths that fail or exit before Redis is contacted.

use assert_cmd::Command;
use predicates::prelude::*;

fn docket() -> Command {
    let mut cmd = Command::cargo_bin("docket").unwrap();
    cmd.env_remove("REDIS_URL")
        .env_remove("REDIS_ADDR")
        .env("DOCKET_LOG_LEVEL", "error")
        .arg("--no-color");
    cmd
}

#[test]
fn test_help_lists_commands() {
    docket()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("get"))
        .stdout(predicate::str::contains("cancel"))
        .stdout(predicate::str::contains("work"));
}

#[test]
fn test_get_rejects_malformed_id() {
    docket()
        .args(["get", "not-a-job-id"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("is not a job id"));
}

#[test]
fn test_cancel_rejects_malformed_id() {
    docket()
        .args(["cancel", "123"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid argument"));
}

#[test]
fn test_submit_rejects_blank_type() {
    docket()
        .args(["submit", " ", "payload"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("job type must not be empty"));
}

#[test]
fn test_submit_rejects_conflicting_schedule() {
    docket()
        .args(["submit", "print", "x", "--delay", "5", "--at", "2030-01-01T00:00:00Z"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be combined"));
}

#[test]
fn test_submit_rejects_oversized_delay() {
    docket()
        .args(["submit", "print", "x", "--delay", "10000000000000"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("is too large"));
}

#[test]
fn test_work_rejects_zero_poll_interval() {
    docket()
        .args(["work", "print", "--poll-interval-ms", "0"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("poll interval must be positive"));
}

#[test]
fn test_invalid_redis_url_is_reported() {
    docket()
        .args(["--redis-url", "http://localhost", "get"])
        .arg(uuid_like())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

fn uuid_like() -> &'static str {
    "6f1c2e1a-9a55-4a5b-8a5e-0c7f3e2d1b00"
}
