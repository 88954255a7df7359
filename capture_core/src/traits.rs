//! Core traits for the capture pipeline's collaborators

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::events::PipelineEvent;
use crate::failure::Failure;
use crate::status::CaptureStatus;
use crate::types::{CaptureId, ErrorEvent, NewErrorEvent, NormalizedText, Source, Stage};

/// Downloads a payload (cloud file, mail body) referenced by a poller.
#[async_trait]
pub trait PayloadFetcher: Send + Sync {
    async fn fetch(&self, source: Source, payload_ref: &str) -> Result<Vec<u8>, Failure>;
}

/// Transcription for voice, normalization for email.
#[async_trait]
pub trait ContentNormalizer: Send + Sync {
    async fn normalize(
        &self,
        source: Source,
        payload_ref: &str,
        payload: &[u8]
    ) -> Result<NormalizedText, Failure>;
}

/// The four primitives the export writer needs from a destination.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Resolves a file name to its final location in the store.
    fn final_path(&self, file_name: &str) -> PathBuf;

    /// Writes `bytes` to a fresh, uniquely named temporary path next to the
    /// final location.
    async fn write_temp(&self, file_name: &str, bytes: &[u8]) -> io::Result<PathBuf>;

    async fn fsync(&self, path: &Path) -> io::Result<()>;

    /// Atomically moves `tmp` to `final_path`. Must fail rather than replace
    /// an existing file.
    async fn rename(&self, tmp: &Path, final_path: &Path) -> io::Result<()>;

    async fn exists(&self, path: &Path) -> io::Result<bool>;

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Best-effort removal of an abandoned temporary file.
    async fn discard(&self, tmp: &Path) -> io::Result<()>;

    /// Removes temporary files left behind by a crash. Returns how many
    /// were removed.
    async fn sweep_temp(&self) -> io::Result<usize> {
        Ok(0)
    }
}

/// Durable attempt history the retry orchestrator reads and appends to.
#[async_trait]
pub trait AttemptJournal: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn current_status(&self, id: &CaptureId) -> Result<Option<CaptureStatus>, Self::Error>;

    /// Failed attempts for `(id, stage)` since the last escalation or operator
    /// reset.
    async fn prior_attempts(&self, id: &CaptureId, stage: Stage) -> Result<u32, Self::Error>;

    async fn record_error(&self, event: NewErrorEvent) -> Result<ErrorEvent, Self::Error>;
}

/// Receives structured pipeline events. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &PipelineEvent) {}
}
