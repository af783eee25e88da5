#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn pacer(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("pacer").unwrap();
    cmd.current_dir(dir.path()).env("PACER_ROOT", dir.path());
    cmd
}

fn init(dir: &TempDir) {
    pacer(dir).arg("init").assert().success();
}

fn propose_json(dir: &TempDir, class: &str, target: &str) -> serde_json::Value {
    let out = pacer(dir)
        .args(["--json", "propose", "--class", class, "--target", target])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    serde_json::from_slice(&out.stdout).unwrap()
}

fn admitted_id(decision: &serde_json::Value) -> String {
    assert_eq!(decision["type"], "admit", "{decision}");
    decision["handle"]["id"].as_str().unwrap().to_string()
}

// ---------------------------------------------------------------------------
// pacer init / config
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_and_store() {
    let dir = TempDir::new().unwrap();
    pacer(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .pacer/config.yaml"));

    assert!(dir.path().join(".pacer/config.yaml").exists());
    assert!(dir.path().join(".pacer/governor.redb").exists());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    pacer(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .pacer/config.yaml"));
}

#[test]
fn commands_before_init_fail() {
    let dir = TempDir::new().unwrap();
    pacer(&dir)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

#[test]
fn config_validate_default_is_clean() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    pacer(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn zero_cap_config_fails_validation_and_startup() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    std::fs::write(
        dir.path().join(".pacer/config.yaml"),
        "classes:\n  follow:\n    daily_cap: 0\n    dedup_scope: false\n",
    )
    .unwrap();

    pacer(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error] follow: daily_cap is 0"));

    pacer(&dir)
        .args(["propose", "--class", "follow", "--target", "userA"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn config_show_lists_classes() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    pacer(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("original_post"))
        .stdout(predicate::str::contains("direct_message"));
}

// ---------------------------------------------------------------------------
// pacer propose / commit / abandon
// ---------------------------------------------------------------------------

#[test]
fn propose_admits_then_rejects_duplicate() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    pacer(&dir)
        .args(["propose", "--class", "follow", "--target", "userA"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("admit "));
    pacer(&dir)
        .args(["propose", "--class", "follow", "--target", "userA"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reject already_actioned"));
}

#[test]
fn commit_marks_entry_committed() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    let id = admitted_id(&propose_json(&dir, "reply", "tweet-1"));

    pacer(&dir).args(["commit", &id]).assert().success();

    pacer(&dir)
        .args(["ledger", "list", "--class", "reply"])
        .assert()
        .success()
        .stdout(predicate::str::contains("committed"))
        .stdout(predicate::str::contains("tweet-1"));
}

#[test]
fn abandon_frees_target_for_retry() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    let id = admitted_id(&propose_json(&dir, "reply", "tweet-2"));

    pacer(&dir)
        .args(["abandon", &id, "--reason", "click failed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("abandoned"));

    admitted_id(&propose_json(&dir, "reply", "tweet-2"));
}

#[test]
fn cooldown_defers_second_original_post() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    admitted_id(&propose_json(&dir, "original_post", "post-1"));
    let second = propose_json(&dir, "post", "post-2");
    assert_eq!(second["type"], "defer");
    assert_eq!(second["reason"], "cooldown_active");
}

#[test]
fn unknown_class_is_an_error() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    pacer(&dir)
        .args(["propose", "--class", "retweet", "--target", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown action class"));
}

#[test]
fn commit_unknown_entry_fails() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    pacer(&dir)
        .args(["commit", "6f1c1f0e-8d1b-4b1e-9a57-0f4f3f9a2b11"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no ledger entry"));
}

// ---------------------------------------------------------------------------
// pacer evaluate
// ---------------------------------------------------------------------------

#[test]
fn evaluate_runs_one_tick_over_file() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    let file = dir.path().join("candidates.jsonl");
    std::fs::write(
        &file,
        concat!(
            "{\"class\":\"follow\",\"target_id\":\"u1\"}\n",
            "{\"class\":\"reply\",\"target_id\":\"t1\"}\n",
            "{\"class\":\"reply\",\"target_id\":\"t1\"}\n",
            "{\"class\":\"direct_message\",\"target_id\":\"vip\",\"urgency_score\":90}\n",
        ),
    )
    .unwrap();

    let out = pacer(&dir)
        .args(["--json", "evaluate"])
        .arg(&file)
        .output()
        .unwrap();
    assert!(out.status.success());
    let results: Vec<serde_json::Value> = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(results.len(), 4);

    let admitted: Vec<&serde_json::Value> = results
        .iter()
        .filter(|r| r["decision"]["type"] == "admit")
        .collect();
    assert_eq!(admitted.len(), 1);
    assert_eq!(admitted[0]["target_id"], "vip", "urgent candidate wins the tick");
    assert!(results
        .iter()
        .any(|r| r["decision"]["reason"] == "already_actioned"));
    assert_eq!(
        results
            .iter()
            .filter(|r| r["decision"]["reason"] == "not_selected")
            .count(),
        2
    );
}

// ---------------------------------------------------------------------------
// pacer spike
// ---------------------------------------------------------------------------

#[test]
fn spike_requires_growth() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    pacer(&dir)
        .args([
            "spike", "--name", "steady", "--volume", "5000000", "--window", "30", "--growth",
            "1.1",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("no spike"))
        .stdout(predicate::str::contains("growth"));
}

#[test]
fn spike_propose_admits_breaking_post() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    let out = pacer(&dir)
        .args([
            "--json", "spike", "--name", "quake", "--volume", "250000", "--window", "15",
            "--growth", "4.5", "--propose",
        ])
        .output()
        .unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["type"], "decided");
    assert_eq!(v["decision"]["type"], "admit");
    assert_eq!(v["score"]["urgency"], "extreme");
}

// ---------------------------------------------------------------------------
// pacer status / reconcile / run
// ---------------------------------------------------------------------------

#[test]
fn status_reports_usage() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    admitted_id(&propose_json(&dir, "reply", "tweet-3"));

    let out = pacer(&dir).args(["--json", "status"]).output().unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let reply = v["classes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["class"] == "reply")
        .unwrap();
    assert_eq!(reply["windows"][0]["used"], 1);
    assert_eq!(reply["pending"], 1);
    assert_eq!(v["account"]["used"], 1);
}

#[test]
fn reconcile_with_nothing_stale() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    pacer(&dir)
        .arg("reconcile")
        .assert()
        .success()
        .stdout(predicate::str::contains("No stale pending entries."));
}

#[test]
fn run_loop_decides_inbox() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    let inbox = dir.path().join("inbox.jsonl");
    std::fs::write(&inbox, "{\"class\":\"follow\",\"target_id\":\"u9\"}\n").unwrap();

    pacer(&dir)
        .args(["run", "--interval-secs", "1", "--ticks", "3", "--inbox"])
        .arg(&inbox)
        .assert()
        .success()
        .stdout(predicate::str::contains("follow 'u9': admit"));
}
