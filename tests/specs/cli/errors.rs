//! Error-path exit codes: 2 for usage mistakes, 1 for runtime errors.

use assert_cmd::Command;
use tempfile::TempDir;

fn conductor() -> Command {
    Command::cargo_bin("conductor").expect("binary built")
}

#[test]
fn unknown_subcommand_is_usage_error() {
    conductor().arg("frobnicate").assert().code(2);
}

#[test]
fn missing_required_argument_is_usage_error() {
    // `dlq requeue` needs a dlq id
    conductor().args(["dlq", "requeue"]).assert().code(2);
}

#[test]
fn unknown_flag_is_usage_error() {
    conductor().args(["status", "--bogus"]).assert().code(2);
}

#[test]
fn admin_commands_fail_cleanly_without_daemon() {
    // Point the state dir somewhere empty so no socket exists
    let dir = TempDir::new().unwrap();
    let assert = conductor()
        .env("ENGINE_STORE_DSN", dir.path())
        .args(["dlq", "list"])
        .assert()
        .code(1);
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("not running"), "stderr: {stderr}");
}

#[test]
fn events_tail_requires_execution_id() {
    conductor().args(["events", "tail"]).assert().code(2);
}
