use std::sync::Arc;

use capture_core::{CaptureId, CaptureStatus, ErrorKind, Failure, PolicyTable, Source};
use errors::IntegrityError;
use pipeline::{CapturePipeline, PipelineError};
use storage::{FsVault, StagingLedger};
use testing::{LedgerFixture, ScriptedFetcher, ScriptedNormalizer, VaultFixture, raw_email};

fn pipeline(
    ledger: Arc<StagingLedger>,
    vault: &VaultFixture,
    fetcher: ScriptedFetcher
) -> CapturePipeline<FsVault> {
    CapturePipeline::builder(
        ledger,
        vault.vault(),
        Arc::new(fetcher),
        Arc::new(ScriptedNormalizer::new())
    )
    .policies(PolicyTable::new())
    .seed(3)
    .build()
}

async fn id_of(ledger: &StagingLedger, external_id: &str) -> CaptureId {
    ledger
        .find_by_external_id(Source::Email, external_id)
        .await
        .unwrap()
        .expect("staged")
        .id
}

#[tokio::test]
async fn test_dead_letter_reset_and_replay() {
    let ledger_fixture = LedgerFixture::new().await;
    let vault = VaultFixture::new().await;

    let denied = pipeline(
        ledger_fixture.ledger(),
        &vault,
        ScriptedFetcher::new().fail_always("mail/m-1", Failure::status(401, "token expired"))
    );
    denied.run_once(&[raw_email("m-1")]).await.unwrap();
    let operator = denied.operator();
    let id = id_of(&ledger_fixture.ledger(), "m-1").await;

    let letters = operator.list_dead_lettered().await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].capture.id, id);
    assert_eq!(letters[0].event.error_kind, ErrorKind::AuthExpired);

    let report = operator.status(&id).await.unwrap().unwrap();
    assert!(report.dead_lettered);
    assert_eq!(report.errors.len(), 1);
    assert!(report.exports.is_empty());

    // Credentials fixed; the operator releases the capture.
    let fixed = pipeline(
        ledger_fixture.ledger(),
        &vault,
        ScriptedFetcher::new().with_payload("mail/m-1", "Back online")
    );
    let reset = operator.reset_to_pending(&id).await.unwrap();
    assert_eq!(reset.status, CaptureStatus::Staged);
    assert!(operator.list_dead_lettered().await.unwrap().is_empty());

    let summary = fixed.recover().await.unwrap();
    assert_eq!(summary.exported, 1);

    let report = operator.status(&id).await.unwrap().unwrap();
    assert_eq!(report.capture.status, CaptureStatus::Exported);
    assert!(!report.dead_lettered);
    assert_eq!(report.exports.len(), 1);
    // History is kept after the reset.
    assert_eq!(report.errors.len(), 1);
}

#[tokio::test]
async fn test_quarantined_capture_reset_after_cleanup() {
    let ledger_fixture = LedgerFixture::new().await;
    let vault = VaultFixture::new().await;
    let pipeline = pipeline(
        ledger_fixture.ledger(),
        &vault,
        ScriptedFetcher::new().with_payload("mail/m-1", "Retry me")
    );

    let storage::StageOutcome::Staged(id) = pipeline.ingest(&raw_email("m-1")).await.unwrap()
    else {
        panic!("not staged");
    };
    let squatter = vault.root().join(format!("{id}.md"));
    std::fs::write(&squatter, "not ours").unwrap();
    pipeline.process_capture(&id).await.unwrap();

    let operator = pipeline.operator();
    let quarantined = operator.list_quarantined().await.unwrap();
    assert_eq!(quarantined.len(), 1);
    assert!(
        quarantined[0]
            .quarantine_reason
            .as_deref()
            .unwrap_or_default()
            .contains(id.as_str())
    );

    std::fs::remove_file(&squatter).unwrap();
    let reset = operator.reset_to_pending(&id).await.unwrap();
    assert_eq!(reset.status, CaptureStatus::Staged);
    assert!(operator.list_quarantined().await.unwrap().is_empty());

    let summary = pipeline.recover().await.unwrap();
    assert_eq!(summary.exported, 1);
    assert!(vault.read(&format!("{id}.md")).contains("Retry me"));
}

#[tokio::test]
async fn test_reset_of_unknown_capture_fails() {
    let ledger_fixture = LedgerFixture::new().await;
    let vault = VaultFixture::new().await;
    let pipeline = pipeline(ledger_fixture.ledger(), &vault, ScriptedFetcher::new());

    let err = pipeline
        .operator()
        .reset_to_pending(&CaptureId::new("missing"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Integrity(IntegrityError::UnknownCapture { .. })
    ));
    assert!(
        pipeline
            .operator()
            .status(&CaptureId::new("missing"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_ledger_stats_reflect_outcomes() {
    let ledger_fixture = LedgerFixture::new().await;
    let vault = VaultFixture::new().await;
    let pipeline = pipeline(
        ledger_fixture.ledger(),
        &vault,
        ScriptedFetcher::new()
            .with_payload("mail/m-1", "One")
            .with_payload("mail/m-2", "One")
            .fail_always("mail/m-3", Failure::status(403, "forbidden"))
    );

    pipeline
        .run_once(&[raw_email("m-1"), raw_email("m-2"), raw_email("m-3")])
        .await
        .unwrap();
    let stats = pipeline.operator().ledger_stats().await.unwrap();

    assert_eq!(stats.by_status.get("exported"), Some(&1));
    assert_eq!(stats.by_status.get("exported_duplicate"), Some(&1));
    assert_eq!(stats.by_status.get("staged"), Some(&1));
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.export_records, 2);
    assert_eq!(stats.error_events, 1);
}
