use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

const RULE: &str = r#"title: Suspicious Whoami
description: Detects whoami execution
detection:
  selection:
    CommandLine|contains: whoami
  condition: selection
"#;

fn sigmaward(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("sigmaward").unwrap();
    cmd.arg("--path").arg(root).env_remove("SIGMAWARD_CONFIG");
    cmd
}

fn initialized() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    sigmaward(dir.path()).arg("init").assert().success();
    dir
}

#[test]
fn init_creates_state() {
    let dir = tempfile::tempdir().unwrap();

    sigmaward(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized Sigmaward"));

    assert!(dir.path().join(".sigmaward/sigmaward.db").exists());
    assert!(dir.path().join(".sigmaward/config.toml").exists());
    assert!(dir.path().join("elastalert/rules").is_dir());

    sigmaward(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already initialized"));
}

#[test]
fn commands_require_init() {
    let dir = tempfile::tempdir().unwrap();

    sigmaward(dir.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

#[test]
fn add_list_and_show() {
    let dir = initialized();
    let rule = dir.path().join("whoami.yml");
    std::fs::write(&rule, RULE).unwrap();

    sigmaward(dir.path())
        .arg("add")
        .arg(&rule)
        .assert()
        .success()
        .stdout(predicate::str::contains("level informational"));

    sigmaward(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Suspicious Whoami"))
        .stdout(predicate::str::contains("suspicious-whoami"));

    sigmaward(dir.path())
        .args(["show", "suspicious-whoami", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"active\": false"))
        .stdout(predicate::str::contains("\"level\": \"informational\""));
}

#[test]
fn duplicate_content_is_rejected() {
    let dir = initialized();
    let first = dir.path().join("a.yml");
    let second = dir.path().join("b.yml");
    std::fs::write(&first, RULE).unwrap();
    // Same document with different key order and spacing
    std::fs::write(
        &second,
        "description: Detects whoami execution\n\ntitle:   Suspicious Whoami\ndetection: {condition: selection, selection: {CommandLine|contains: whoami}}\n",
    )
    .unwrap();

    sigmaward(dir.path()).arg("add").arg(&first).assert().success();
    sigmaward(dir.path())
        .arg("update")
        .arg("Suspicious Whoami")
        .arg(&second)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn missing_fields_are_listed() {
    let dir = initialized();
    let rule = dir.path().join("bad.yml");
    std::fs::write(&rule, "title: Incomplete\ndetection:\n  selection: {a: b}\n").unwrap();

    sigmaward(dir.path())
        .arg("add")
        .arg(&rule)
        .assert()
        .failure()
        .stderr(predicate::str::contains("description, detection.condition"));
}

#[test]
fn load_then_export() {
    let dir = initialized();
    let rules = dir.path().join("rules");
    std::fs::create_dir_all(&rules).unwrap();
    std::fs::write(rules.join("whoami.yml"), RULE).unwrap();
    std::fs::write(
        rules.join("net_user.yaml"),
        "detection:\n  selection: {Image: net.exe}\n  condition: selection\n",
    )
    .unwrap();

    sigmaward(dir.path())
        .arg("load")
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 2 rule(s)"));

    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    sigmaward(dir.path()).arg("export").arg(&out).assert().success();

    // Slugs come from the file name on bulk load
    assert!(out.join("whoami.yml").exists());
    assert!(out.join("net-user.yml").exists());
}

#[test]
fn destructive_commands_need_force() {
    let dir = initialized();

    sigmaward(dir.path()).arg("clear").assert().failure();
    sigmaward(dir.path()).arg("clear-artifacts").assert().failure();
    sigmaward(dir.path())
        .args(["clear", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted 0 rule(s)"));
}

#[test]
fn sync_and_status_with_no_active_rules() {
    let dir = initialized();

    sigmaward(dir.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("Installed 0 artifact(s)"));

    sigmaward(dir.path())
        .args(["status", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"active_rules\": 0"));
}

#[test]
fn sync_alerts_fails_when_store_is_down() {
    let dir = initialized();
    std::fs::write(
        dir.path().join(".sigmaward/config.toml"),
        "[elasticsearch]\nendpoint = \"http://127.0.0.1:1\"\ntimeout_secs = 2\n",
    )
    .unwrap();

    sigmaward(dir.path())
        .arg("sync-alerts")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Errors:    1"));
}

#[test]
fn alert_stats_on_empty_ledger() {
    let dir = initialized();

    sigmaward(dir.path())
        .args(["alert-stats", "--since", "-2 hours"])
        .assert()
        .success()
        .stdout(predicate::str::contains(": 0"));
}

#[test]
fn alert_stats_does_not_contact_the_store() {
    let dir = initialized();
    std::fs::write(
        dir.path().join(".sigmaward/config.toml"),
        "[elasticsearch]\nendpoint = \"http://127.0.0.1:1\"\ntimeout_secs = 1\n",
    )
    .unwrap();

    sigmaward(dir.path())
        .args(["alert-stats", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total_alerts\": 0"));
}

#[test]
fn out_of_range_windows_are_rejected() {
    let dir = initialized();
    std::fs::write(
        dir.path().join(".sigmaward/config.toml"),
        "[reconcile]\nlookback_minutes = 9223372036854775807\nstats_window_hours = 9223372036854775807\n",
    )
    .unwrap();

    sigmaward(dir.path())
        .arg("alert-stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid stats_window_hours"));

    sigmaward(dir.path())
        .arg("sync-alerts")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid lookback_minutes"));

    sigmaward(dir.path())
        .args(["alert-stats", "--since", "100000000d"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));

    sigmaward(dir.path())
        .args(["alert-stats", "--since", "1h"])
        .assert()
        .success();
}

#[test]
fn alerts_for_a_rule() {
    let dir = initialized();
    let rule = dir.path().join("whoami.yml");
    std::fs::write(&rule, RULE).unwrap();
    sigmaward(dir.path()).arg("add").arg(&rule).assert().success();

    sigmaward(dir.path())
        .args(["alerts", "Suspicious Whoami", "--since", "-1 day"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No alerts for 'Suspicious Whoami'"));

    sigmaward(dir.path())
        .args(["alerts", "suspicious-whoami", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));

    sigmaward(dir.path())
        .args(["alerts", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Rule not found"));
}
