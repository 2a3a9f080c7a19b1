//! End-to-end tests of the CLI against a real database file.

mod common;

use common::TestEnv;
use predicates::prelude::*;

#[test]
fn test_init_creates_database_and_identity() {
    let env = TestEnv::new();
    let result = env.json(&["init"]);

    assert!(!result["user_id"].as_str().unwrap().is_empty());
    assert_eq!(result["local_remote"], "local");
    assert_eq!(result["active_session_id"], result["default_session_id"]);
    assert!(env.home().join("muxstore.db").exists());
    assert!(env.home().join("remoteid").exists());
}

#[test]
fn test_init_is_idempotent() {
    let env = TestEnv::new();
    let first = env.json(&["init"]);
    let second = env.json(&["init"]);

    assert_eq!(first["user_id"], second["user_id"]);
    assert_eq!(first["local_remote_id"], second["local_remote_id"]);
    assert_eq!(first["default_session_id"], second["default_session_id"]);

    let sessions = env.json(&["session", "list"]);
    assert_eq!(sessions["count"], 1);
    let remotes = env.json(&["remote", "list"]);
    assert_eq!(remotes["count"], 1);
}

#[test]
fn test_session_and_remote_lists_after_init() {
    let env = TestEnv::init();

    let sessions = env.json(&["session", "list"]);
    assert_eq!(sessions["sessions"][0]["name"], "default");
    assert_eq!(sessions["sessions"][0]["active"], true);
    assert_eq!(sessions["sessions"][0]["screens"], 1);

    let remotes = env.json(&["remote", "list"]);
    assert_eq!(remotes["remotes"][0]["remotealias"], "local");
    assert_eq!(remotes["remotes"][0]["remotetype"], "ssh");
    assert_eq!(remotes["remotes"][0]["autoconnect"], true);
}

#[test]
fn test_line_add_then_list() {
    let env = TestEnv::init();

    let added = env.json(&["line", "add", "--session", "default", "check the logs"]);
    env.json(&["line", "add", "--session", "default", "then restart"]);

    let lines = env.json(&["line", "list", "--session", "default"]);
    assert_eq!(lines["count"], 2);
    assert_eq!(lines["lines"][0]["lineid"], added["line_id"]);
    assert_eq!(lines["lines"][0]["text"], "check the logs");
    assert_eq!(lines["lines"][1]["text"], "then restart");
    assert_eq!(lines["lines"][0]["linetype"], "text");
}

#[test]
fn test_line_add_to_unknown_window_fails() {
    let env = TestEnv::init();
    env.muxstore()
        .args(["line", "add", "--session", "default", "--window", "nope", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_history_of_fresh_session_is_empty() {
    let env = TestEnv::init();
    let history = env.json(&["history", "--session", "default", "--limit", "10"]);
    assert_eq!(history["count"], 0);
}

#[test]
fn test_unknown_session_reports_json_error() {
    let env = TestEnv::init();
    env.muxstore()
        .args(["history", "--session", "missing"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("\"error\""))
        .stderr(predicate::str::contains("missing"));
}

#[test]
fn test_human_output() {
    let env = TestEnv::init();
    env.muxstore()
        .args(["-H", "session", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 session(s):"))
        .stdout(predicate::str::contains("* [1] default"));

    env.muxstore()
        .args(["-H", "history", "--session", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("Error: "));
}

#[test]
fn test_home_flag_overrides_env() {
    let env = TestEnv::new();
    let other = common::TempDir::new().unwrap();
    env.muxstore()
        .arg("--home")
        .arg(other.path())
        .arg("init")
        .assert()
        .success();

    assert!(other.path().join("muxstore.db").exists());
    assert!(!env.home().join("muxstore.db").exists());
}

#[test]
fn test_invalid_busy_timeout_env_fails() {
    let env = TestEnv::new();
    env.muxstore()
        .env("MUXSTORE_BUSY_TIMEOUT_MS", "soon")
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("MUXSTORE_BUSY_TIMEOUT_MS"));
}

#[test]
fn test_config_file_db_name_is_used() {
    let env = TestEnv::new();
    std::fs::write(env.home().join("config.kdl"), "db-file \"alt.db\"\n").unwrap();
    env.muxstore().arg("init").assert().success();
    assert!(env.home().join("alt.db").exists());
}
