//! Error taxonomy and per-kind retry policies.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use validator::{Validate, ValidationError};

use crate::types::Stage;

/// Stable classification of a failed attempt.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    EnumIter,
)]
pub enum ErrorKind {
    NetworkTransient,
    RateLimited,
    /// Permanent until external re-auth.
    AuthExpired,
    /// e.g. a cloud file not yet synced locally.
    ResourceTemporarilyUnavailable,
    ResourceCorrupt,
    OutOfMemoryOrCapacity,
    PermissionDenied,
    /// Permanent until an operator frees space.
    StorageFull,
    /// Never auto-resolves.
    IdentityCollision,
    Unknown
}

impl ErrorKind {
    /// Whether the kind is transient by nature. `Unknown` retries
    /// conservatively.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkTransient
                | ErrorKind::RateLimited
                | ErrorKind::ResourceTemporarilyUnavailable
                | ErrorKind::Unknown
        )
    }
}

/// What the orchestrator does once an item's retries are over.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EscalationAction {
    LogOnly,
    /// Permanent: the capture is never retried again.
    ExportPlaceholder,
    ResetUpstreamCursor,
    /// Dead-letters the item until an operator resets it.
    RequireManualAction,
    OpenCircuit
}

impl EscalationAction {
    /// A placeholder cannot stand in for a failed export, so the export stage
    /// halts for an operator instead.
    pub fn resolve_for(self, stage: Stage) -> EscalationAction {
        match (self, stage) {
            (EscalationAction::ExportPlaceholder, Stage::Export) => {
                EscalationAction::RequireManualAction
            }
            (action, _) => action
        }
    }

    pub fn dead_letters(self) -> bool {
        self == EscalationAction::RequireManualAction
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_delay_bounds"))]
pub struct RetryPolicy {
    pub retriable: bool,
    /// Total failed attempts before escalation, including the first try.
    #[validate(range(min = 1, max = 100))]
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    #[validate(range(min = 1.0, max = 10.0))]
    pub multiplier: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter_fraction: f64,
    #[validate(range(min = 1))]
    pub circuit_breaker_threshold: u32,
    pub escalation_action: EscalationAction
}

fn validate_delay_bounds(policy: &RetryPolicy) -> Result<(), ValidationError> {
    if policy.base_delay_ms > policy.max_delay_ms {
        return Err(ValidationError::new("base_delay_exceeds_max_delay"));
    }
    Ok(())
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn transient(
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        jitter_fraction: f64,
        circuit_breaker_threshold: u32,
        escalation_action: EscalationAction
    ) -> Self {
        Self {
            retriable: true,
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            multiplier: 2.0,
            jitter_fraction,
            circuit_breaker_threshold,
            escalation_action
        }
    }

    fn permanent(circuit_breaker_threshold: u32, escalation_action: EscalationAction) -> Self {
        Self {
            retriable: false,
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
            jitter_fraction: 0.0,
            circuit_breaker_threshold,
            escalation_action
        }
    }

    /// Built-in policy for a kind.
    pub fn default_for(kind: ErrorKind) -> Self {
        use EscalationAction::*;
        match kind {
            ErrorKind::NetworkTransient => {
                Self::transient(5, 1_000, 60_000, 0.2, 5, ExportPlaceholder)
            }
            ErrorKind::RateLimited => Self::transient(6, 5_000, 300_000, 0.2, 3, OpenCircuit),
            ErrorKind::AuthExpired => Self::permanent(1, RequireManualAction),
            ErrorKind::ResourceTemporarilyUnavailable => {
                Self::transient(8, 2_000, 600_000, 0.25, 10, LogOnly)
            }
            ErrorKind::ResourceCorrupt => Self::permanent(5, ExportPlaceholder),
            ErrorKind::OutOfMemoryOrCapacity => Self::permanent(3, ExportPlaceholder),
            ErrorKind::PermissionDenied => Self::permanent(1, RequireManualAction),
            ErrorKind::StorageFull => Self::permanent(1, RequireManualAction),
            ErrorKind::IdentityCollision => Self::permanent(1, RequireManualAction),
            ErrorKind::Unknown => Self::transient(3, 1_000, 30_000, 0.2, 5, ExportPlaceholder)
        }
    }
}

/// Policies keyed by kind. Kinds without an entry use
/// [`RetryPolicy::default_for`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyTable {
    overrides: BTreeMap<ErrorKind, RetryPolicy>
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, kind: ErrorKind, policy: RetryPolicy) -> Self {
        self.overrides.insert(kind, policy);
        self
    }

    pub fn set(&mut self, kind: ErrorKind, policy: RetryPolicy) {
        self.overrides.insert(kind, policy);
    }

    /// Effective policy for `kind`. `IdentityCollision` always escalates to
    /// `RequireManualAction` and never retries, whatever the override says.
    pub fn get(&self, kind: ErrorKind) -> RetryPolicy {
        let mut policy = self
            .overrides
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| RetryPolicy::default_for(kind));
        if kind == ErrorKind::IdentityCollision {
            policy.retriable = false;
            policy.escalation_action = EscalationAction::RequireManualAction;
        }
        policy
    }

    pub fn overrides(&self) -> impl Iterator<Item = (&ErrorKind, &RetryPolicy)> {
        self.overrides.iter()
    }
}
