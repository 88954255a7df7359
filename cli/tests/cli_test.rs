use std::path::Path;
use std::time::Duration;

use assert_cmd::{Command, cargo_bin_cmd};
use capture_core::{CaptureId, ErrorKind, EscalationAction, NewErrorEvent, Stage};
use predicates::prelude::*;
use storage::{StageOutcome, StagingLedger};
use tempfile::TempDir;
use testing::{raw_email, raw_voice};

fn database_url(dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", dir.join("ledger.db").display())
}

fn capture_ledger(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("capture-ledger");
    cmd.env_remove("CAPTURE_CONFIG")
        .env("CAPTURE_DATABASE_URL", database_url(dir))
        .env("RUST_LOG", "error")
        .env("NO_COLOR", "1");
    cmd
}

/// One quarantined email and one dead-lettered voice memo.
async fn seed(dir: &Path) -> (CaptureId, CaptureId) {
    let ledger = StagingLedger::connect(&database_url(dir), Duration::from_secs(5))
        .await
        .unwrap();

    let StageOutcome::Staged(quarantined) = ledger.stage(&raw_email("m-1")).await.unwrap() else {
        panic!("m-1 not staged");
    };
    ledger
        .quarantine(NewErrorEvent {
            capture_id: quarantined.clone(),
            stage: Stage::Export,
            error_kind: ErrorKind::IdentityCollision,
            message: "Export target exists with different content".to_string(),
            attempt_number: 1,
            escalation_action: Some(EscalationAction::RequireManualAction),
            dead_lettered: true
        })
        .await
        .unwrap();

    let StageOutcome::Staged(halted) = ledger.stage(&raw_voice("memo-1")).await.unwrap() else {
        panic!("memo-1 not staged");
    };
    ledger
        .append_error(NewErrorEvent {
            capture_id: halted.clone(),
            stage: Stage::Fetch,
            error_kind: ErrorKind::AuthExpired,
            message: "token expired".to_string(),
            attempt_number: 1,
            escalation_action: Some(EscalationAction::RequireManualAction),
            dead_lettered: true
        })
        .await
        .unwrap();

    ledger.close().await;
    (quarantined, halted)
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    capture_ledger(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("quarantined"))
        .stdout(predicate::str::contains("dead-letters"))
        .stdout(predicate::str::contains("reset"))
        .stdout(predicate::str::contains("stats"));
}

#[test]
fn test_stats_on_empty_ledger() {
    let dir = TempDir::new().unwrap();
    let output = capture_ledger(dir.path())
        .args(["stats", "--json"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["dead_lettered"], 0);
    assert_eq!(stats["export_records"], 0);
}

#[test]
fn test_status_of_unknown_capture_fails() {
    let dir = TempDir::new().unwrap();
    capture_ledger(dir.path())
        .args(["status", "no-such-id"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No capture with id no-such-id"));
}

#[tokio::test]
async fn test_lists_quarantined_and_dead_lettered() {
    let dir = TempDir::new().unwrap();
    let (quarantined, halted) = seed(dir.path()).await;

    capture_ledger(dir.path())
        .arg("quarantined")
        .assert()
        .success()
        .stdout(predicate::str::contains(quarantined.as_str()))
        .stdout(predicate::str::contains("different content"));

    let output = capture_ledger(dir.path())
        .args(["dead-letters", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let letters: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let letters = letters.as_array().unwrap();
    // The quarantine also awaits the operator.
    assert_eq!(letters.len(), 2);
    assert_eq!(letters[0]["capture"]["status"], "quarantined");
    assert_eq!(letters[1]["capture"]["id"], halted.as_str());
    assert_eq!(letters[1]["event"]["error_kind"], "AuthExpired");
}

#[tokio::test]
async fn test_status_shows_error_history() {
    let dir = TempDir::new().unwrap();
    let (_, halted) = seed(dir.path()).await;

    capture_ledger(dir.path())
        .args(["status", halted.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("staged"))
        .stdout(predicate::str::contains("AuthExpired"))
        .stdout(predicate::str::contains("require_manual_action"))
        .stdout(predicate::str::contains("capture-ledger reset"));
}

#[tokio::test]
async fn test_reset_releases_quarantined_capture() {
    let dir = TempDir::new().unwrap();
    let (quarantined, _) = seed(dir.path()).await;

    capture_ledger(dir.path())
        .args(["reset", quarantined.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("is pending again (staged)"));

    let output = capture_ledger(dir.path())
        .args(["quarantined", "--json"])
        .output()
        .unwrap();
    let listed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_reset_of_processed_capture_is_refused() {
    let dir = TempDir::new().unwrap();
    let ledger = StagingLedger::connect(&database_url(dir.path()), Duration::from_secs(5))
        .await
        .unwrap();
    let StageOutcome::Staged(id) = ledger.stage(&raw_email("m-9")).await.unwrap() else {
        panic!("m-9 not staged");
    };
    ledger
        .complete_processing(&id, None, "done")
        .await
        .unwrap();
    ledger.close().await;

    // Processed without a dead letter: nothing to reset.
    capture_ledger(dir.path())
        .args(["reset", id.as_str()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid status transition"));
}
