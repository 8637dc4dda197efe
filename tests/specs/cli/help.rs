//! Black-box checks on the CLI surface: subcommands exist, help renders
//! and usage errors exit 2.

use assert_cmd::Command;

fn conductor() -> Command {
    Command::cargo_bin("conductor").expect("binary built")
}

#[test]
fn top_level_help_lists_subcommands() {
    let assert = conductor().arg("--help").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    for subcommand in ["serve", "dlq", "locks", "events", "status"] {
        assert!(stdout.contains(subcommand), "missing {subcommand} in help");
    }
}

#[test]
fn version_prints() {
    conductor().arg("--version").assert().success();
}

#[test]
fn dlq_help_lists_list_and_requeue() {
    let assert = conductor().args(["dlq", "--help"]).assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains("list"));
    assert!(stdout.contains("requeue"));
}

#[test]
fn locks_help_lists_list_and_release() {
    let assert = conductor().args(["locks", "--help"]).assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains("list"));
    assert!(stdout.contains("release"));
}

#[test]
fn serve_help_documents_tuning_flags() {
    let assert = conductor().args(["serve", "--help"]).assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains("--workers"));
    assert!(stdout.contains("--queue-batch"));
    assert!(stdout.contains("--lease-ttl"));
}
