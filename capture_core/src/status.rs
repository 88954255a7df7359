//! Capture lifecycle state machine.
//!
//! ```text
//! staged ──► processed ──► exported
//!   │            ├───────► exported_duplicate
//!   │            ├───────► exported_placeholder
//!   └────────────┴───────► quarantined
//! ```
//!
//! Every legal edge is listed in [`TRANSITIONS`]; the ledger refuses anything
//! else. `quarantined → staged` exists only as an operator reset.

use errors::IntegrityError;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CaptureStatus {
    Staged,
    Processed,
    Exported,
    ExportedDuplicate,
    ExportedPlaceholder,
    Quarantined
}

use CaptureStatus::{
    Exported, ExportedDuplicate, ExportedPlaceholder, Processed, Quarantined, Staged
};

pub const TRANSITIONS: &[(CaptureStatus, CaptureStatus)] = &[
    (Staged, Processed),
    (Processed, Exported),
    (Processed, ExportedDuplicate),
    (Processed, ExportedPlaceholder),
    (Staged, Quarantined),
    (Processed, Quarantined)
];

pub const OPERATOR_RESETS: &[(CaptureStatus, CaptureStatus)] = &[(Quarantined, Staged)];

impl CaptureStatus {
    /// `exported`, `exported_duplicate` or `exported_placeholder`.
    pub fn is_exported(self) -> bool {
        matches!(self, Exported | ExportedDuplicate | ExportedPlaceholder)
    }

    pub fn is_terminal(self) -> bool {
        self.is_exported() || self == Quarantined
    }

    pub fn can_transition_to(self, to: CaptureStatus) -> bool {
        TRANSITIONS.contains(&(self, to))
    }

    /// Validates `self → to` against the transition table.
    pub fn transition(self, to: CaptureStatus) -> Result<CaptureStatus, IntegrityError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(IntegrityError::InvalidTransition {
                from: self.to_string(),
                to: to.to_string()
            })
        }
    }

    /// Target of an operator reset, if one is allowed from this status.
    pub fn reset_target(self) -> Option<CaptureStatus> {
        OPERATOR_RESETS
            .iter()
            .find(|(from, _)| *from == self)
            .map(|(_, to)| *to)
    }

    /// All statuses that count as non-terminal, for recovery scans.
    pub fn non_terminal() -> [CaptureStatus; 2] {
        [Staged, Processed]
    }
}
