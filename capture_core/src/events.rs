use serde::{Deserialize, Serialize};

use crate::policy::{ErrorKind, EscalationAction};
use crate::types::{CaptureId, ExportMode, Source, Stage};

/// Breaker state as reported in events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen
}

/// Structured event emitted by the core for metrics/health collaborators.
///
/// Together the events are enough to rebuild each capture's state history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    ItemStaged {
        capture_id: CaptureId,
        source: Source,
        external_id: String
    },
    DuplicateSkipped {
        capture_id: CaptureId,
        duplicate_of: Option<CaptureId>,
        stage: Stage
    },
    RetryAttempt {
        capture_id: CaptureId,
        stage: Stage,
        dependency: String,
        error_kind: ErrorKind,
        attempt: u32,
        delay_ms: u64
    },
    CircuitStateChange {
        dependency: String,
        from: BreakerState,
        to: BreakerState
    },
    Escalated {
        capture_id: CaptureId,
        stage: Stage,
        error_kind: ErrorKind,
        action: EscalationAction,
        attempts: u32
    },
    ExportCompleted {
        capture_id: CaptureId,
        destination_path: String,
        mode: ExportMode
    },
    ItemQuarantined {
        capture_id: CaptureId,
        reason: String
    }
}

impl PipelineEvent {
    /// Event name as used in logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::ItemStaged { .. } => "item_staged",
            PipelineEvent::DuplicateSkipped { .. } => "duplicate_skipped",
            PipelineEvent::RetryAttempt { .. } => "retry_attempt",
            PipelineEvent::CircuitStateChange { .. } => "circuit_state_change",
            PipelineEvent::Escalated { .. } => "escalated",
            PipelineEvent::ExportCompleted { .. } => "export_completed",
            PipelineEvent::ItemQuarantined { .. } => "item_quarantined"
        }
    }
}
