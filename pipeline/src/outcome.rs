//! What happened to a capture during one pass of the coordinator.

use capture_core::{CaptureId, CaptureStatus, ErrorKind, ExportMode, ExportRecord, Stage};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Written to the vault (initial, placeholder, or adopted after a crash).
    Exported(ExportRecord),
    /// Another capture holds the same content identity.
    Duplicate { of: CaptureId },
    /// Left pending; a later pass retries it.
    Deferred { stage: Stage, reason: String },
    /// Halted until an operator resets it.
    DeadLettered { stage: Stage, kind: ErrorKind },
    Quarantined { reason: String },
    /// Already terminal before any work was done.
    Settled { status: CaptureStatus },
    /// Dead-lettered by an earlier pass and not reset since.
    AwaitingOperator,
    /// Shutdown arrived during a backoff wait.
    Interrupted { stage: Stage }
}

impl ItemOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemOutcome::Exported(_)
                | ItemOutcome::Duplicate { .. }
                | ItemOutcome::Quarantined { .. }
                | ItemOutcome::Settled { .. }
        )
    }
}

/// Totals for a `run_once` or `recover` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub staged: usize,
    /// Items the ledger had already seen under the same external id.
    pub redelivered: usize,
    pub exported: usize,
    pub placeholders: usize,
    pub recovered: usize,
    pub duplicates: usize,
    pub deferred: usize,
    pub dead_lettered: usize,
    pub quarantined: usize,
    pub settled: usize,
    /// Temp files removed from the vault before recovery.
    pub swept_temp_files: usize,
    /// The pass stopped early because of shutdown.
    pub interrupted: bool
}

impl RunSummary {
    pub fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Exported(record) => match record.mode {
                ExportMode::Placeholder => self.placeholders += 1,
                ExportMode::Recovery => self.recovered += 1,
                ExportMode::Initial | ExportMode::DuplicateSkip => self.exported += 1
            },
            ItemOutcome::Duplicate { .. } => self.duplicates += 1,
            ItemOutcome::Deferred { .. } => self.deferred += 1,
            ItemOutcome::DeadLettered { .. } | ItemOutcome::AwaitingOperator => {
                self.dead_lettered += 1;
            }
            ItemOutcome::Quarantined { .. } => self.quarantined += 1,
            ItemOutcome::Settled { .. } => self.settled += 1,
            ItemOutcome::Interrupted { .. } => self.interrupted = true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(mode: ExportMode) -> ExportRecord {
        ExportRecord {
            id: 1,
            capture_id: CaptureId::new("c-1"),
            destination_path: Some("/vault/c-1.md".to_string()),
            content_identity: None,
            mode,
            duplicate_of: None,
            created_at: 0
        }
    }

    #[test]
    fn test_summary_counts_by_export_mode() {
        let mut summary = RunSummary::default();
        summary.record(&ItemOutcome::Exported(record(ExportMode::Initial)));
        summary.record(&ItemOutcome::Exported(record(ExportMode::Placeholder)));
        summary.record(&ItemOutcome::Exported(record(ExportMode::Recovery)));
        summary.record(&ItemOutcome::Interrupted {
            stage: Stage::Fetch
        });

        assert_eq!(summary.exported, 1);
        assert_eq!(summary.placeholders, 1);
        assert_eq!(summary.recovered, 1);
        assert!(summary.interrupted);
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let outcome = ItemOutcome::DeadLettered {
            stage: Stage::Fetch,
            kind: ErrorKind::AuthExpired
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "dead_lettered");
        assert_eq!(json["kind"], "AuthExpired");
        assert!(!outcome.is_terminal());
    }
}
