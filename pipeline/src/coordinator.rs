//! # Pipeline Coordinator
//!
//! Drives each capture through `fetch → identity → transcribe/normalize →
//! processed → export`, one capture at a time. Every collaborator call runs
//! inside the retry orchestrator; every side effect is preceded by a ledger
//! read, so replaying a capture after a crash resumes where it stopped.
//!
//! Voice memos bind their audio fingerprint right after download, before
//! the expensive transcription. Email bodies get their text identity when
//! they reach `processed`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use capture_core::{
    Capture, CaptureId, CaptureStatus, ContentNormalizer, DestinationStore, ErrorKind,
    EscalationAction, EventSink, Failure, NewErrorEvent, PayloadFetcher, PipelineEvent,
    PolicyTable, RawItem, Source, Stage
};
use config::PipelineConfig;
use errors::{ExportError, IntegrityError};
use observability::TracingSink;
use rand::SeedableRng;
use rand::rngs::StdRng;
use resilience::{CircuitRegistry, ErrorContext, RetryOrchestrator, RetryOutcome, TerminalError};
use storage::{
    AtomicExporter, BindOutcome, FsVault, LedgerError, ProcessOutcome, StageOutcome,
    StagingLedger, render
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::operator::OperatorApi;
use crate::outcome::{ItemOutcome, RunSummary};

/// Breaker key for the collaborator behind `(source, stage)`.
pub fn dependency_for(source: Source, stage: Stage) -> &'static str {
    match (source, stage) {
        (Source::Voice, Stage::Fetch) => "cloud_files",
        (Source::Email, Stage::Fetch) => "mail_api",
        (_, Stage::Transcribe) => "transcriber",
        (_, Stage::Normalize) => "normalizer",
        (_, Stage::Export) => "vault"
    }
}

/// Why a capture stopped short of export.
enum Interrupt {
    Stop(ItemOutcome),
    /// Content was replaced by a placeholder; export it.
    Placeholder(Capture),
    Failed(PipelineError)
}

impl From<PipelineError> for Interrupt {
    fn from(err: PipelineError) -> Self {
        Interrupt::Failed(err)
    }
}

impl From<LedgerError> for Interrupt {
    fn from(err: LedgerError) -> Self {
        Interrupt::Failed(err.into())
    }
}

pub struct PipelineBuilder<D: DestinationStore> {
    ledger: Arc<StagingLedger>,
    store: Arc<D>,
    fetcher: Arc<dyn PayloadFetcher>,
    normalizer: Arc<dyn ContentNormalizer>,
    policies: PolicyTable,
    cooldown: Duration,
    fingerprint_bytes: usize,
    extension: String,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
    seed: Option<u64>
}

impl<D: DestinationStore> PipelineBuilder<D> {
    pub fn new(
        ledger: Arc<StagingLedger>,
        store: Arc<D>,
        fetcher: Arc<dyn PayloadFetcher>,
        normalizer: Arc<dyn ContentNormalizer>
    ) -> Self {
        Self {
            ledger,
            store,
            fetcher,
            normalizer,
            policies: PolicyTable::default(),
            cooldown: Duration::from_secs(60),
            fingerprint_bytes: utils::DEFAULT_FINGERPRINT_BYTES,
            extension: "md".to_string(),
            events: Arc::new(TracingSink::new()),
            shutdown: CancellationToken::new(),
            seed: None
        }
    }

    pub fn policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn breaker_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn fingerprint_bytes(mut self, bytes: usize) -> Self {
        self.fingerprint_bytes = bytes;
        self
    }

    pub fn file_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Seeds the backoff jitter, for reproducible delays.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> CapturePipeline<D> {
        let mut orchestrator = RetryOrchestrator::new(
            Arc::clone(&self.ledger),
            self.policies,
            CircuitRegistry::new(self.cooldown),
            Arc::clone(&self.events),
            self.shutdown.clone()
        );
        if let Some(seed) = self.seed {
            orchestrator = orchestrator.with_rng(StdRng::seed_from_u64(seed));
        }

        CapturePipeline {
            exporter: AtomicExporter::new(Arc::clone(&self.ledger), self.store, self.extension),
            ledger: self.ledger,
            fetcher: self.fetcher,
            normalizer: self.normalizer,
            orchestrator,
            events: self.events,
            shutdown: self.shutdown,
            fingerprint_bytes: self.fingerprint_bytes,
            turn: Mutex::new(())
        }
    }
}

impl PipelineBuilder<FsVault> {
    /// Opens the ledger and vault named in `config` and applies its policies,
    /// breaker cooldown and fingerprint size.
    pub async fn from_config(
        config: &PipelineConfig,
        fetcher: Arc<dyn PayloadFetcher>,
        normalizer: Arc<dyn ContentNormalizer>
    ) -> Result<Self> {
        let ledger = StagingLedger::connect(
            &config.ledger.database_url,
            Duration::from_secs(config.ledger.busy_timeout_seconds)
        )
        .await?;
        let vault = FsVault::open(&config.vault.root).await?;

        Ok(Self::new(Arc::new(ledger), Arc::new(vault), fetcher, normalizer)
            .policies(config.retry.policies.clone())
            .breaker_cooldown(config.breaker.cooldown())
            .fingerprint_bytes(config.identity.fingerprint_bytes)
            .file_extension(config.vault.file_extension.clone()))
    }
}

pub struct CapturePipeline<D: DestinationStore> {
    ledger: Arc<StagingLedger>,
    fetcher: Arc<dyn PayloadFetcher>,
    normalizer: Arc<dyn ContentNormalizer>,
    exporter: AtomicExporter<D>,
    orchestrator: RetryOrchestrator<StagingLedger>,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
    fingerprint_bytes: usize,
    /// Held for the whole of one capture's pass.
    turn: Mutex<()>
}

impl<D: DestinationStore> CapturePipeline<D> {
    pub fn builder(
        ledger: Arc<StagingLedger>,
        store: Arc<D>,
        fetcher: Arc<dyn PayloadFetcher>,
        normalizer: Arc<dyn ContentNormalizer>
    ) -> PipelineBuilder<D> {
        PipelineBuilder::new(ledger, store, fetcher, normalizer)
    }

    pub fn ledger(&self) -> &Arc<StagingLedger> {
        &self.ledger
    }

    pub fn breakers(&self) -> &CircuitRegistry {
        self.orchestrator.breakers()
    }

    pub fn operator(&self) -> OperatorApi {
        OperatorApi::new(Arc::clone(&self.ledger))
    }

    /// Cancels pending backoff waits and stops the current pass after the
    /// capture in flight.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stages an item pushed by a poller.
    pub async fn ingest(&self, item: &RawItem) -> Result<StageOutcome> {
        let outcome = self.ledger.stage(item).await?;
        if let StageOutcome::Staged(id) = &outcome {
            self.events.emit(&PipelineEvent::ItemStaged {
                capture_id: id.clone(),
                source: item.source,
                external_id: item.external_id.clone()
            });
        }
        Ok(outcome)
    }

    /// Stages and processes a poller batch in order. Re-delivered items are
    /// left to [`CapturePipeline::recover`].
    pub async fn run_once(&self, items: &[RawItem]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for item in items {
            if self.shutdown.is_cancelled() {
                summary.interrupted = true;
                break;
            }
            match self.ingest(item).await? {
                StageOutcome::Staged(id) => {
                    summary.staged += 1;
                    summary.record(&self.process_capture(&id).await?);
                    if summary.interrupted {
                        break;
                    }
                }
                StageOutcome::DuplicateSkipped(_) => summary.redelivered += 1
            }
        }
        info!(
            staged = summary.staged,
            exported = summary.exported,
            duplicates = summary.duplicates,
            deferred = summary.deferred,
            "Batch finished"
        );
        Ok(summary)
    }

    /// Startup recovery: removes abandoned temp files, then resumes every
    /// non-terminal capture outside the dead-letter queue, oldest first.
    pub async fn recover(&self) -> Result<RunSummary> {
        let mut summary = RunSummary {
            swept_temp_files: self.exporter.store().sweep_temp().await?,
            ..RunSummary::default()
        };

        let pending = self.ledger.pending_for_recovery().await?;
        info!(pending = pending.len(), "Recovering non-terminal captures");
        for capture in pending {
            if self.shutdown.is_cancelled() {
                summary.interrupted = true;
                break;
            }
            summary.record(&self.process_capture(&capture.id).await?);
            if summary.interrupted {
                break;
            }
        }
        Ok(summary)
    }

    /// Moves one capture as far forward as it can go from its current status.
    pub async fn process_capture(&self, id: &CaptureId) -> Result<ItemOutcome> {
        let _turn = self.turn.lock().await;
        let capture = self
            .ledger
            .get(id)
            .await?
            .ok_or_else(|| IntegrityError::UnknownCapture {
                capture_id: id.to_string()
            })?;

        if capture.is_terminal() {
            return Ok(ItemOutcome::Settled {
                status: capture.status
            });
        }
        if self.ledger.is_dead_lettered(id).await? {
            debug!(capture_id = %id, "Capture awaits operator reset");
            return Ok(ItemOutcome::AwaitingOperator);
        }

        // A processed capture resumes at export; its content is not redone.
        let processed = if let Some(escalation) = self.ledger.unconsumed_placeholder(id).await? {
            // Retries for this capture are already spent.
            info!(capture_id = %id, stage = %escalation.stage, "Storing journaled placeholder");
            let body = render::placeholder_body(
                &capture,
                escalation.stage,
                escalation.error_kind,
                escalation.attempt_number,
                &escalation.message
            );
            self.ledger.process_as_placeholder(id, &body).await?
        } else if capture.status == CaptureStatus::Staged {
            match self.process_staged(capture).await {
                Ok(capture) | Err(Interrupt::Placeholder(capture)) => capture,
                Err(Interrupt::Stop(outcome)) => return Ok(outcome),
                Err(Interrupt::Failed(err)) => return Err(err)
            }
        } else {
            capture
        };
        self.export_processed(&processed).await
    }

    async fn process_staged(&self, capture: Capture) -> std::result::Result<Capture, Interrupt> {
        let source = capture.source;
        let payload_ref = capture.payload_ref.as_str();

        let fetcher = &self.fetcher;
        let payload = self
            .attempt(&capture, Stage::Fetch, move || {
                fetcher.fetch(source, payload_ref)
            })
            .await?;

        if source == Source::Voice {
            let fingerprint = utils::audio_fingerprint(&payload, self.fingerprint_bytes);
            let bound = self.ledger.bind_identity(&capture.id, &fingerprint).await;
            if let BindOutcome::Duplicate { of } =
                self.ledger_step(&capture, Stage::Fetch, bound).await?
            {
                return Err(Interrupt::Stop(self.duplicate(&capture, of, Stage::Fetch)));
            }
        }

        let stage = match source {
            Source::Voice => Stage::Transcribe,
            Source::Email => Stage::Normalize
        };
        let normalizer = &self.normalizer;
        let bytes = payload.as_slice();
        let text = self
            .attempt(&capture, stage, move || {
                normalizer.normalize(source, payload_ref, bytes)
            })
            .await?;

        let identity = match source {
            Source::Email => Some(utils::text_identity(text.as_str())),
            Source::Voice => None
        };
        let completed = self
            .ledger
            .complete_processing(&capture.id, identity.as_ref(), text.as_str())
            .await;
        if let ProcessOutcome::Duplicate { of } =
            self.ledger_step(&capture, stage, completed).await?
        {
            return Err(Interrupt::Stop(self.duplicate(&capture, of, stage)));
        }
        Ok(capture)
    }

    /// Runs a collaborator call under the orchestrator. A placeholder
    /// escalation stores the placeholder body before returning.
    async fn attempt<T, F, Fut>(
        &self,
        capture: &Capture,
        stage: Stage,
        operation: F
    ) -> std::result::Result<T, Interrupt>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, Failure>>
    {
        let context = ErrorContext::new(
            capture.id.clone(),
            stage,
            dependency_for(capture.source, stage)
        );
        match self.orchestrator.execute(&context, operation).await {
            Ok(RetryOutcome::Completed(value)) => Ok(value),
            Ok(RetryOutcome::AlreadySettled(status)) => {
                Err(Interrupt::Stop(ItemOutcome::Settled { status }))
            }
            Err(TerminalError::Exhausted {
                kind,
                escalation: EscalationAction::ExportPlaceholder,
                attempts,
                message
            }) => {
                let body = render::placeholder_body(capture, stage, kind, attempts, &message);
                let placeholder = self
                    .ledger
                    .process_as_placeholder(&capture.id, &body)
                    .await?;
                Err(Interrupt::Placeholder(placeholder))
            }
            Err(err) => Err(Interrupt::Stop(self.settle(capture, stage, err).await?))
        }
    }

    async fn export_processed(&self, capture: &Capture) -> Result<ItemOutcome> {
        let context = ErrorContext::new(
            capture.id.clone(),
            Stage::Export,
            dependency_for(capture.source, Stage::Export)
        );
        let exporter = &self.exporter;
        let result = self
            .orchestrator
            .execute(&context, move || async move {
                // Only I/O is retried; ledger and integrity errors surface as-is.
                match exporter.export(capture).await {
                    Err(ExportError::Io {
                        operation,
                        path,
                        source
                    }) => Err(Failure {
                        message: format!("{operation} {path}: {source}"),
                        ..Failure::io(&source)
                    }),
                    other => Ok(other)
                }
            })
            .await;

        match result {
            Ok(RetryOutcome::Completed(Ok(record))) => {
                self.events.emit(&PipelineEvent::ExportCompleted {
                    capture_id: capture.id.clone(),
                    destination_path: record.destination_path.clone().unwrap_or_default(),
                    mode: record.mode
                });
                Ok(ItemOutcome::Exported(record))
            }
            Ok(RetryOutcome::Completed(Err(ExportError::Integrity(err)))) if err.is_collision() => {
                self.quarantine(capture, Stage::Export, &err).await
            }
            Ok(RetryOutcome::Completed(Err(err))) => Err(err.into()),
            Ok(RetryOutcome::AlreadySettled(status)) => Ok(ItemOutcome::Settled { status }),
            Err(err) => self.settle(capture, Stage::Export, err).await
        }
    }

    /// Carries out the escalation for a call that will not be retried now.
    async fn settle(
        &self,
        capture: &Capture,
        stage: Stage,
        err: TerminalError
    ) -> Result<ItemOutcome> {
        match err {
            TerminalError::CircuitOpen { dependency } => Ok(ItemOutcome::Deferred {
                stage,
                reason: format!("circuit open for {dependency}")
            }),
            TerminalError::Cancelled => {
                info!(capture_id = %capture.id, stage = %stage, "Capture left pending at shutdown");
                Ok(ItemOutcome::Interrupted { stage })
            }
            TerminalError::Journal(reason) => Err(PipelineError::Journal { reason }),
            TerminalError::Exhausted {
                kind,
                escalation,
                attempts,
                message
            } => {
                let reason = format!("{kind} after {attempts} attempt(s): {message}");
                match escalation {
                    EscalationAction::LogOnly | EscalationAction::OpenCircuit => {
                        Ok(ItemOutcome::Deferred { stage, reason })
                    }
                    EscalationAction::ResetUpstreamCursor => {
                        self.ledger.reset_cursor(capture.source).await?;
                        Ok(ItemOutcome::Deferred { stage, reason })
                    }
                    // Placeholders never stand in for a failed export.
                    EscalationAction::RequireManualAction | EscalationAction::ExportPlaceholder => {
                        warn!(
                            capture_id = %capture.id,
                            stage = %stage,
                            error_kind = %kind,
                            "Capture halted until operator reset"
                        );
                        Ok(ItemOutcome::DeadLettered { stage, kind })
                    }
                }
            }
        }
    }

    /// Quarantines on identity or export-target collisions; anything else
    /// from the ledger is an error.
    async fn ledger_step<T>(
        &self,
        capture: &Capture,
        stage: Stage,
        result: std::result::Result<T, LedgerError>
    ) -> std::result::Result<T, Interrupt> {
        match result {
            Ok(value) => Ok(value),
            Err(LedgerError::Integrity(err)) if err.is_collision() => {
                Err(Interrupt::Stop(self.quarantine(capture, stage, &err).await?))
            }
            Err(err) => Err(err.into())
        }
    }

    async fn quarantine(
        &self,
        capture: &Capture,
        stage: Stage,
        err: &IntegrityError
    ) -> Result<ItemOutcome> {
        let reason = err.to_string();
        let attempts = self
            .ledger
            .attempts_since_reset(&capture.id, stage)
            .await?
            .saturating_add(1);
        let action = self
            .orchestrator
            .policies()
            .get(ErrorKind::IdentityCollision)
            .escalation_action;

        self.ledger
            .quarantine(NewErrorEvent {
                capture_id: capture.id.clone(),
                stage,
                error_kind: ErrorKind::IdentityCollision,
                message: reason.clone(),
                attempt_number: attempts,
                escalation_action: Some(action),
                dead_lettered: action.dead_letters()
            })
            .await?;

        self.events.emit(&PipelineEvent::Escalated {
            capture_id: capture.id.clone(),
            stage,
            error_kind: ErrorKind::IdentityCollision,
            action,
            attempts
        });
        self.events.emit(&PipelineEvent::ItemQuarantined {
            capture_id: capture.id.clone(),
            reason: reason.clone()
        });
        Ok(ItemOutcome::Quarantined { reason })
    }

    fn duplicate(&self, capture: &Capture, of: CaptureId, stage: Stage) -> ItemOutcome {
        self.events.emit(&PipelineEvent::DuplicateSkipped {
            capture_id: capture.id.clone(),
            duplicate_of: Some(of.clone()),
            stage
        });
        ItemOutcome::Duplicate { of }
    }
}
