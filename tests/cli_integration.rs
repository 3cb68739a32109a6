//! Integration tests for the loopguard CLI

use std::path::{Path, PathBuf};

use assert_cmd::cargo;
use assert_cmd::Command;
use loopguard::action::HistoryFile;
use loopguard::testing::{identical_replacements, ActionBuilder};
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the loopguard binary
fn loopguard() -> Command {
    Command::new(cargo::cargo_bin!("loopguard"))
}

fn history_path(project: &Path) -> PathBuf {
    project.join(".loopguard").join("action_history.jsonl")
}

fn write_history(project: &Path, count: usize) {
    let history = HistoryFile::new(history_path(project));
    for action in identical_replacements("foo.py", "def bar():", count) {
        history.append(&action).unwrap();
    }
}

#[test]
fn test_help() {
    loopguard()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Loop detection and intervention"));
}

#[test]
fn test_version() {
    loopguard()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_analyze_empty_history() {
    let temp = TempDir::new().unwrap();

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("analyze")
        .assert()
        .success()
        .stdout(predicate::str::contains("No loops detected"));
}

#[test]
fn test_analyze_reports_loops() {
    let temp = TempDir::new().unwrap();
    write_history(temp.path(), 5);

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("analyze")
        .assert()
        .success()
        .stdout(predicate::str::contains("action_loop"))
        .stdout(predicate::str::contains("modification_loop"));
}

#[test]
fn test_analyze_json_includes_intervention() {
    let temp = TempDir::new().unwrap();
    write_history(temp.path(), 12);

    let output = loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("analyze")
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["actions"], 12);
    assert_eq!(report["detections"][0]["severity"], "critical");
    assert_eq!(report["intervention"]["intervention_type"], "action_loop");
    assert!(report["intervention"].get("type").is_none());
    assert_eq!(report["intervention"]["requires_user_input"], false);
}

#[test]
fn test_max_interventions_override_escalates() {
    let temp = TempDir::new().unwrap();
    write_history(temp.path(), 12);

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("--max-interventions")
        .arg("1")
        .arg("analyze")
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"intervention_type\": \"escalation\""));
}

#[test]
fn test_explicit_history_flag() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("elsewhere.jsonl");
    let history = HistoryFile::new(&path);
    for file in ["a.py", "b.py"] {
        history
            .append(&ActionBuilder::new("read_file").file(file).build())
            .unwrap();
    }

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("--history")
        .arg(&path)
        .arg("stats")
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total_actions\": 2"));
}

#[test]
fn test_stats() {
    let temp = TempDir::new().unwrap();
    write_history(temp.path(), 3);

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Total actions: 3"))
        .stdout(predicate::str::contains("str_replace"));
}

#[test]
fn test_recent_filters_and_limits() {
    let temp = TempDir::new().unwrap();
    let history = HistoryFile::new(history_path(temp.path()));
    for (tool, file) in [
        ("read_file", "a.py"),
        ("str_replace", "a.py"),
        ("read_file", "b.py"),
        ("read_file", "c.py"),
    ] {
        history
            .append(&ActionBuilder::new(tool).file(file).build())
            .unwrap();
    }

    let output = loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("recent")
        .arg("--tool")
        .arg("read_file")
        .arg("-n")
        .arg("2")
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let actions: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let files: Vec<&str> = actions
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["file_path"].as_str().unwrap())
        .collect();
    assert_eq!(files, vec!["b.py", "c.py"]);

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("recent")
        .arg("--file")
        .arg("a.py")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 of 4 actions"))
        .stdout(predicate::str::contains("str_replace"));

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("recent")
        .arg("--agent")
        .arg("reviewer")
        .assert()
        .success()
        .stdout(predicate::str::contains("No matching actions"));
}

#[test]
fn test_watch_once() {
    let temp = TempDir::new().unwrap();
    write_history(temp.path(), 12);

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("watch")
        .arg("--once")
        .arg("--interval")
        .arg("10")
        .assert()
        .success()
        .stdout(predicate::str::contains("INTERVENTION"))
        .stdout(predicate::str::contains("12 actions processed, 1 interventions"));
}

#[test]
fn test_watch_keeps_running_when_history_is_unreadable() {
    let temp = TempDir::new().unwrap();
    // A directory in place of the history file fails every read.
    let unreadable = temp.path().join("history_dir");
    std::fs::create_dir_all(&unreadable).unwrap();

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("--history")
        .arg(&unreadable)
        .arg("watch")
        .arg("--once")
        .arg("--interval")
        .arg("10")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 actions processed, 0 interventions"))
        .stderr(predicate::str::contains("retrying on next poll"));
}

#[test]
fn test_config_show_defaults() {
    let temp = TempDir::new().unwrap();

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("config")
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("maxInterventions"))
        .stdout(predicate::str::contains("actionRepeat"));
}

#[test]
fn test_config_validate_rejects_invalid_settings() {
    let temp = TempDir::new().unwrap();
    let state = temp.path().join(".loopguard");
    std::fs::create_dir_all(&state).unwrap();
    std::fs::write(
        state.join("settings.json"),
        r#"{"intervention": {"maxInterventions": 0}}"#,
    )
    .unwrap();

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("config")
        .arg("validate")
        .assert()
        .failure()
        .code(7)
        .stderr(predicate::str::contains("maxInterventions"));
}

#[test]
fn test_malformed_settings_fail_with_config_error() {
    let temp = TempDir::new().unwrap();
    let state = temp.path().join(".loopguard");
    std::fs::create_dir_all(&state).unwrap();
    std::fs::write(state.join("settings.json"), "{ not json").unwrap();

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("analyze")
        .assert()
        .failure()
        .code(7);
}

#[test]
fn test_clear_requires_force() {
    let temp = TempDir::new().unwrap();
    write_history(temp.path(), 2);

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("clear")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
    assert!(history_path(temp.path()).exists());

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("clear")
        .arg("--force")
        .assert()
        .success();
    assert!(!history_path(temp.path()).exists());
}

#[test]
fn test_clear_archive() {
    let temp = TempDir::new().unwrap();
    write_history(temp.path(), 2);

    loopguard()
        .arg("--project")
        .arg(temp.path())
        .arg("clear")
        .arg("--archive")
        .assert()
        .success()
        .stdout(predicate::str::contains("Archived action history"));

    assert!(!history_path(temp.path()).exists());
    let archived = std::fs::read_dir(temp.path().join(".loopguard"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("action_history_"))
        .count();
    assert_eq!(archived, 1);
}

#[test]
fn test_nonexistent_project_fails() {
    loopguard()
        .arg("--project")
        .arg("/nonexistent/loopguard/project")
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
