//! Operator queries and the single write an operator may perform, all in
//! terms of the ledger's public API.

use std::sync::Arc;

use capture_core::{Capture, CaptureId, ErrorEvent, ExportRecord};
use errors::IntegrityError;
use serde::Serialize;
use storage::{DeadLetter, LedgerStats, StagingLedger};
use tracing::info;

use crate::error::Result;

/// Everything the ledger knows about one capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureReport {
    pub capture: Capture,
    pub dead_lettered: bool,
    pub exports: Vec<ExportRecord>,
    pub errors: Vec<ErrorEvent>
}

#[derive(Clone)]
pub struct OperatorApi {
    ledger: Arc<StagingLedger>
}

impl OperatorApi {
    pub fn new(ledger: Arc<StagingLedger>) -> Self {
        Self { ledger }
    }

    pub async fn status(&self, id: &CaptureId) -> Result<Option<CaptureReport>> {
        let Some(capture) = self.ledger.get(id).await? else {
            return Ok(None);
        };
        Ok(Some(CaptureReport {
            dead_lettered: self.ledger.is_dead_lettered(id).await?,
            exports: self.ledger.export_records(id).await?,
            errors: self.ledger.error_events(id).await?,
            capture
        }))
    }

    pub async fn list_quarantined(&self) -> Result<Vec<Capture>> {
        Ok(self.ledger.list_quarantined().await?)
    }

    pub async fn list_dead_lettered(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.ledger.dead_letters().await?)
    }

    /// Returns a quarantined or dead-lettered capture to the pending set.
    /// The next recovery pass picks it up from its current status.
    pub async fn reset_to_pending(&self, id: &CaptureId) -> Result<Capture> {
        if self.ledger.status_of(id).await?.is_none() {
            return Err(IntegrityError::UnknownCapture {
                capture_id: id.to_string()
            }
            .into());
        }
        let capture = self.ledger.reset_to_pending(id).await?;
        info!(capture_id = %id, status = %capture.status, "Operator reset capture");
        Ok(capture)
    }

    pub async fn ledger_stats(&self) -> Result<LedgerStats> {
        Ok(self.ledger.stats().await?)
    }
}
