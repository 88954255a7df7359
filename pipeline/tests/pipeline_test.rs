use std::sync::Arc;

use capture_core::{
    Capture, CaptureStatus, ErrorKind, EscalationAction, ExportMode, Failure, PolicyTable,
    RetryPolicy, Source, Stage
};
use pipeline::{CapturePipeline, ItemOutcome};
use storage::FsVault;
use testing::{
    CountingStore, LedgerFixture, RecordingSink, ScriptedFetcher, ScriptedNormalizer,
    VaultFixture, raw_email, raw_voice
};

/// Default policies with millisecond delays.
fn fast_policies() -> PolicyTable {
    let mut table = PolicyTable::new();
    for kind in [
        ErrorKind::NetworkTransient,
        ErrorKind::RateLimited,
        ErrorKind::ResourceTemporarilyUnavailable,
        ErrorKind::Unknown
    ] {
        let mut policy = RetryPolicy::default_for(kind);
        policy.base_delay_ms = 1;
        policy.max_delay_ms = 5;
        table.set(kind, policy);
    }
    table
}

struct Harness {
    _ledger: LedgerFixture,
    vault: VaultFixture,
    store: Arc<CountingStore<FsVault>>,
    fetcher: Arc<ScriptedFetcher>,
    normalizer: Arc<ScriptedNormalizer>,
    events: RecordingSink,
    pipeline: CapturePipeline<CountingStore<FsVault>>
}

impl Harness {
    async fn new(fetcher: ScriptedFetcher, normalizer: ScriptedNormalizer) -> Self {
        let ledger = LedgerFixture::new().await;
        let vault = VaultFixture::new().await;
        let store = Arc::new(CountingStore::new(vault.vault().as_ref().clone()));
        let fetcher = Arc::new(fetcher);
        let normalizer = Arc::new(normalizer);
        let events = RecordingSink::new();

        let pipeline = CapturePipeline::builder(
            ledger.ledger(),
            Arc::clone(&store),
            fetcher.clone(),
            normalizer.clone()
        )
        .policies(fast_policies())
        .events(Arc::new(events.clone()))
        .seed(7)
        .build();

        Self {
            _ledger: ledger,
            vault,
            store,
            fetcher,
            normalizer,
            events,
            pipeline
        }
    }

    async fn capture(&self, source: Source, external_id: &str) -> Capture {
        self.pipeline
            .ledger()
            .find_by_external_id(source, external_id)
            .await
            .unwrap()
            .expect("capture staged")
    }
}

#[tokio::test]
async fn test_voice_happy_path_exports_once() {
    let h = Harness::new(
        ScriptedFetcher::new().with_payload("voice/memo-1", b"RIFF audio".to_vec()),
        ScriptedNormalizer::new().with_text("voice/memo-1", "Remember to water the plants")
    )
    .await;

    let summary = h.pipeline.run_once(&[raw_voice("memo-1")]).await.unwrap();
    assert_eq!(summary.staged, 1);
    assert_eq!(summary.exported, 1);

    let capture = h.capture(Source::Voice, "memo-1").await;
    assert_eq!(capture.status, CaptureStatus::Exported);
    assert_eq!(
        capture.content_identity.as_ref().map(|i| i.scheme()),
        Some("audio-fp")
    );

    let records = h.pipeline.ledger().export_records(&capture.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].mode, ExportMode::Initial);

    let file = format!("{}.md", capture.id);
    assert_eq!(h.vault.files(), vec![file.clone()]);
    assert!(h.vault.read(&file).contains("Remember to water the plants"));

    assert_eq!(h.fetcher.calls("voice/memo-1"), 1);
    assert_eq!(h.normalizer.calls("voice/memo-1"), 1);
    assert_eq!(h.events.count("retry_attempt"), 0);
    assert_eq!(h.events.names(), vec!["item_staged", "export_completed"]);
}

#[tokio::test]
async fn test_identical_emails_export_once() {
    let h = Harness::new(
        ScriptedFetcher::new()
            .with_payload("mail/m-1", "Buy oat milk\r\n")
            .with_payload("mail/m-2", "Buy oat milk\n\n"),
        ScriptedNormalizer::new()
    )
    .await;

    let summary = h
        .pipeline
        .run_once(&[raw_email("m-1"), raw_email("m-2")])
        .await
        .unwrap();
    assert_eq!(summary.exported, 1);
    assert_eq!(summary.duplicates, 1);

    let first = h.capture(Source::Email, "m-1").await;
    let second = h.capture(Source::Email, "m-2").await;
    assert_eq!(first.status, CaptureStatus::Exported);
    assert_eq!(second.status, CaptureStatus::ExportedDuplicate);
    assert_eq!(first.content_identity, second.content_identity);

    assert_eq!(h.store.writes(), 1);
    assert_eq!(h.vault.files().len(), 1);

    let owner_record = h.pipeline.ledger().latest_export(&first.id).await.unwrap().unwrap();
    let dup_record = h.pipeline.ledger().latest_export(&second.id).await.unwrap().unwrap();
    assert_eq!(dup_record.mode, ExportMode::DuplicateSkip);
    assert_eq!(dup_record.duplicate_of, Some(first.id.clone()));
    assert_eq!(dup_record.destination_path, owner_record.destination_path);
    assert_eq!(h.events.count("duplicate_skipped"), 1);
}

#[tokio::test]
async fn test_duplicate_audio_skips_transcription() {
    let audio = b"identical recording".to_vec();
    let h = Harness::new(
        ScriptedFetcher::new()
            .with_payload("voice/memo-1", audio.clone())
            .with_payload("voice/memo-2", audio),
        ScriptedNormalizer::new().with_text("voice/memo-1", "transcript")
    )
    .await;

    let summary = h
        .pipeline
        .run_once(&[raw_voice("memo-1"), raw_voice("memo-2")])
        .await
        .unwrap();

    assert_eq!(summary.exported, 1);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(h.normalizer.calls("voice/memo-2"), 0);
    let second = h.capture(Source::Voice, "memo-2").await;
    assert_eq!(second.status, CaptureStatus::ExportedDuplicate);
    assert_eq!(second.raw_content, None);
}

#[tokio::test]
async fn test_exhausted_transient_retries_export_placeholder() {
    let h = Harness::new(
        ScriptedFetcher::new().fail_always("mail/m-1", Failure::status(503, "service unavailable")),
        ScriptedNormalizer::new()
    )
    .await;
    let max_attempts = fast_policies()
        .get(ErrorKind::NetworkTransient)
        .max_attempts;

    let summary = h.pipeline.run_once(&[raw_email("m-1")]).await.unwrap();
    assert_eq!(summary.placeholders, 1);

    let capture = h.capture(Source::Email, "m-1").await;
    assert_eq!(capture.status, CaptureStatus::ExportedPlaceholder);
    assert!(capture.is_placeholder);

    let errors = h.pipeline.ledger().error_events(&capture.id).await.unwrap();
    assert_eq!(errors.len(), max_attempts as usize);
    assert!(errors.iter().all(|e| e.error_kind == ErrorKind::NetworkTransient));
    assert_eq!(
        errors.last().unwrap().escalation_action,
        Some(EscalationAction::ExportPlaceholder)
    );
    assert_eq!(h.fetcher.calls("mail/m-1"), max_attempts as usize);

    let text = h.vault.read(&format!("{}.md", capture.id));
    assert!(text.contains("placeholder: true"));
    assert!(text.contains("NetworkTransient"));

    // Permanent: later passes never touch it again.
    let again = h.pipeline.recover().await.unwrap();
    assert_eq!(again, pipeline::RunSummary::default());
    assert_eq!(h.fetcher.calls("mail/m-1"), max_attempts as usize);
    assert_eq!(
        h.pipeline.process_capture(&capture.id).await.unwrap(),
        ItemOutcome::Settled {
            status: CaptureStatus::ExportedPlaceholder
        }
    );
}

#[tokio::test]
async fn test_permission_denied_escalates_without_backoff() {
    let h = Harness::new(
        ScriptedFetcher::new().fail_always("mail/m-1", Failure::status(403, "forbidden")),
        ScriptedNormalizer::new()
    )
    .await;

    let started = std::time::Instant::now();
    let summary = h.pipeline.run_once(&[raw_email("m-1")]).await.unwrap();
    assert!(started.elapsed() < std::time::Duration::from_secs(1));
    assert_eq!(summary.dead_lettered, 1);

    let capture = h.capture(Source::Email, "m-1").await;
    assert_eq!(capture.status, CaptureStatus::Staged);
    assert_eq!(h.fetcher.calls("mail/m-1"), 1);
    assert_eq!(h.events.count("retry_attempt"), 0);
    assert_eq!(h.events.count("escalated"), 1);

    let errors = h.pipeline.ledger().error_events(&capture.id).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_kind, ErrorKind::PermissionDenied);
    assert_eq!(
        errors[0].escalation_action,
        Some(EscalationAction::RequireManualAction)
    );
    assert!(errors[0].dead_lettered);
    // One item's permissions do not pause the mail API.
    assert_eq!(
        h.pipeline.breakers().state("mail_api"),
        capture_core::BreakerState::Closed
    );

    // Halted: recovery leaves it for the operator.
    h.pipeline.recover().await.unwrap();
    assert_eq!(h.fetcher.calls("mail/m-1"), 1);
    assert_eq!(
        h.pipeline.process_capture(&capture.id).await.unwrap(),
        ItemOutcome::AwaitingOperator
    );
}

#[tokio::test]
async fn test_corrupt_audio_becomes_placeholder_after_fingerprint() {
    let h = Harness::new(
        ScriptedFetcher::new().with_payload("voice/memo-1", b"garbled".to_vec()),
        ScriptedNormalizer::new()
            .fail_always("voice/memo-1", Failure::message("corrupt stream header"))
    )
    .await;

    let summary = h.pipeline.run_once(&[raw_voice("memo-1")]).await.unwrap();
    assert_eq!(summary.placeholders, 1);

    let capture = h.capture(Source::Voice, "memo-1").await;
    assert_eq!(capture.status, CaptureStatus::ExportedPlaceholder);
    assert!(capture.content_identity.is_some());
    let errors = h.pipeline.ledger().error_events(&capture.id).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, Stage::Transcribe);
    assert_eq!(errors[0].error_kind, ErrorKind::ResourceCorrupt);
}

#[tokio::test]
async fn test_transient_failures_then_success_exports_normally() {
    let h = Harness::new(
        ScriptedFetcher::new()
            .with_payload("mail/m-1", "Book flights")
            .fail_times("mail/m-1", 2, Failure::status(503, "try later")),
        ScriptedNormalizer::new()
    )
    .await;

    let summary = h.pipeline.run_once(&[raw_email("m-1")]).await.unwrap();
    assert_eq!(summary.exported, 1);

    let capture = h.capture(Source::Email, "m-1").await;
    assert_eq!(capture.status, CaptureStatus::Exported);
    assert_eq!(capture.attempt_count, 0);
    assert_eq!(h.fetcher.calls("mail/m-1"), 3);
    assert_eq!(h.events.count("retry_attempt"), 2);
    assert_eq!(
        h.pipeline.ledger().error_events(&capture.id).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_rate_limit_opens_circuit_and_defers_other_items() {
    let h = Harness::new(
        ScriptedFetcher::new()
            .fail_always("mail/m-1", Failure::status(429, "slow down"))
            .with_payload("mail/m-2", "Second note"),
        ScriptedNormalizer::new()
    )
    .await;
    let threshold = fast_policies()
        .get(ErrorKind::RateLimited)
        .circuit_breaker_threshold;

    let summary = h
        .pipeline
        .run_once(&[raw_email("m-1"), raw_email("m-2")])
        .await
        .unwrap();

    assert_eq!(summary.deferred, 2);
    assert_eq!(h.fetcher.calls("mail/m-1"), threshold as usize);
    assert_eq!(h.fetcher.calls("mail/m-2"), 0);
    assert_eq!(
        h.pipeline.breakers().state("mail_api"),
        capture_core::BreakerState::Open
    );
    assert_eq!(h.events.count("circuit_state_change"), 1);

    // Unrelated dependencies are not paused.
    assert_eq!(
        h.pipeline.breakers().state("cloud_files"),
        capture_core::BreakerState::Closed
    );
    let second = h.capture(Source::Email, "m-2").await;
    assert_eq!(second.status, CaptureStatus::Staged);
    assert!(
        h.pipeline
            .ledger()
            .error_events(&second.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_foreign_file_at_export_target_quarantines() {
    let h = Harness::new(
        ScriptedFetcher::new().with_payload("mail/m-1", "Mine"),
        ScriptedNormalizer::new()
    )
    .await;
    let id = match h.pipeline.ingest(&raw_email("m-1")).await.unwrap() {
        storage::StageOutcome::Staged(id) => id,
        other => panic!("unexpected {other:?}")
    };
    let target = h.vault.root().join(format!("{id}.md"));
    std::fs::write(&target, "hand-written note").unwrap();

    let outcome = h.pipeline.process_capture(&id).await.unwrap();

    assert!(matches!(outcome, ItemOutcome::Quarantined { .. }));
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "hand-written note");
    let capture = h.pipeline.ledger().get(&id).await.unwrap().unwrap();
    assert_eq!(capture.status, CaptureStatus::Quarantined);

    let errors = h.pipeline.ledger().error_events(&id).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_kind, ErrorKind::IdentityCollision);
    assert_eq!(
        errors[0].escalation_action,
        Some(EscalationAction::RequireManualAction)
    );
    assert_eq!(h.events.count("item_quarantined"), 1);
    assert_eq!(h.pipeline.breakers().state("vault"), capture_core::BreakerState::Closed);
}

#[tokio::test]
async fn test_redelivered_item_is_not_staged_twice() {
    let h = Harness::new(
        ScriptedFetcher::new().with_payload("mail/m-1", "Once"),
        ScriptedNormalizer::new()
    )
    .await;

    h.pipeline.run_once(&[raw_email("m-1")]).await.unwrap();
    let summary = h.pipeline.run_once(&[raw_email("m-1")]).await.unwrap();

    assert_eq!(summary.staged, 0);
    assert_eq!(summary.redelivered, 1);
    assert_eq!(h.fetcher.calls("mail/m-1"), 1);
    assert_eq!(h.store.writes(), 1);
}
