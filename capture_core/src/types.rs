use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::policy::{ErrorKind, EscalationAction};
use crate::status::CaptureStatus;

/// Input channel a capture arrived through.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Source {
    Voice,
    Email
}

/// Processing stage a fallible operation belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// Downloading the payload (cloud file sync, mail API).
    Fetch,
    /// Speech-to-text for voice payloads.
    Transcribe,
    /// Text normalization for email bodies.
    Normalize,
    /// Writing the artifact to the destination store.
    Export
}

/// How an `ExportRecord` came to exist.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExportMode {
    Initial,
    DuplicateSkip,
    Placeholder,
    /// File was found on disk after a crash and adopted without rewriting.
    Recovery
}

/// Time-ordered capture identifier (UUID v7 text form).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaptureId(String);

impl CaptureId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CaptureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable deduplication key. The scheme prefix (`text-sha256:`, `audio-fp:`)
/// is part of the value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentIdentity(String);

impl ContentIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scheme part of the identity, e.g. `text-sha256`.
    pub fn scheme(&self) -> &str {
        self.0.split_once(':').map(|(scheme, _)| scheme).unwrap_or("")
    }
}

impl std::fmt::Display for ContentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output of the transcription/normalization worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedText(pub String);

impl NormalizedText {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Item pushed by a source poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub source: Source,
    /// Poller-assigned id (file path, message id). Unique per source.
    pub external_id: String,
    /// Opaque handle the fetcher understands.
    pub payload_ref: String,
    /// Unix millis.
    pub discovered_at: i64,
    #[serde(default)]
    pub metadata: serde_json::Value
}

/// One row per distinct ingested item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub id: CaptureId,
    pub source: Source,
    pub external_id: String,
    pub payload_ref: String,
    pub content_identity: Option<ContentIdentity>,
    pub raw_content: Option<String>,
    pub is_placeholder: bool,
    pub status: CaptureStatus,
    /// Failed attempts in the current stage.
    pub attempt_count: u32,
    pub last_attempt_at: Option<i64>,
    pub source_metadata: serde_json::Value,
    pub quarantine_reason: Option<String>,
    /// Error events with an id at or below this watermark were cleared by an
    /// operator reset.
    pub dlq_cleared_through: i64,
    pub discovered_at: i64,
    pub created_at: i64,
    pub updated_at: i64
}

impl Capture {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Append-only audit row, one per export outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: i64,
    pub capture_id: CaptureId,
    /// `None` only for a duplicate whose owner has not been exported yet.
    pub destination_path: Option<String>,
    pub content_identity: Option<ContentIdentity>,
    pub mode: ExportMode,
    pub duplicate_of: Option<CaptureId>,
    pub created_at: i64
}

/// Append-only row per failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub id: i64,
    pub capture_id: CaptureId,
    pub stage: Stage,
    pub error_kind: ErrorKind,
    pub message: String,
    pub attempt_number: u32,
    /// Set only on the attempt that ended the retry loop.
    pub escalation_action: Option<EscalationAction>,
    pub dead_lettered: bool,
    pub created_at: i64
}

/// An `ErrorEvent` before the ledger assigns id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewErrorEvent {
    pub capture_id: CaptureId,
    pub stage: Stage,
    pub error_kind: ErrorKind,
    pub message: String,
    pub attempt_number: u32,
    pub escalation_action: Option<EscalationAction>,
    pub dead_lettered: bool
}
