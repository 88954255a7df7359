//! # Atomic Export Writer
//!
//! `write_temp → fsync → rename`, then the ledger transition. The ledger is
//! only told about files that are already durable under their final name.
//!
//! A final file that exists before we write is either our own orphan from a
//! crash between rename and ledger update (identical bytes, adopted with
//! `mode = recovery`) or a collision (different bytes, never overwritten).

use std::io;
use std::path::Path;
use std::sync::Arc;

use capture_core::{Capture, CaptureStatus, DestinationStore, ExportMode, ExportRecord};
use errors::{ExportError, IntegrityError};
use tracing::{info, warn};

use crate::ledger::{LedgerError, StagingLedger};
use crate::render;

pub struct AtomicExporter<D: DestinationStore> {
    ledger: Arc<StagingLedger>,
    store: Arc<D>,
    extension: String
}

impl<D: DestinationStore> AtomicExporter<D> {
    pub fn new(ledger: Arc<StagingLedger>, store: Arc<D>, extension: impl Into<String>) -> Self {
        Self {
            ledger,
            store,
            extension: extension.into()
        }
    }

    pub fn store(&self) -> &Arc<D> {
        &self.store
    }

    /// Exports a processed capture. The ledger row is re-read first, so a
    /// stale `capture` is harmless. Re-exporting a capture that already
    /// reached an exported status returns its existing record without
    /// touching the destination.
    pub async fn export(&self, capture: &Capture) -> Result<ExportRecord, ExportError> {
        let id = &capture.id;
        let capture = self
            .ledger
            .get(id)
            .await
            .map_err(ledger_error)?
            .ok_or_else(|| IntegrityError::UnknownCapture {
                capture_id: id.to_string()
            })?;

        if capture.status.is_exported() {
            return self
                .ledger
                .latest_export(id)
                .await
                .map_err(ledger_error)?
                .ok_or_else(|| ExportError::Ledger {
                    reason: format!("{id} is {} but has no export record", capture.status)
                });
        }
        if capture.status != CaptureStatus::Processed {
            return Err(ExportError::NotExportable {
                capture_id: id.to_string(),
                status: capture.status.to_string()
            });
        }

        let file_name = render::file_name(&capture, &self.extension);
        let final_path = self.store.final_path(&file_name);
        let bytes = render::render(&capture);

        let existing = self
            .store
            .exists(&final_path)
            .await
            .map_err(|source| io_error("exists", &final_path, source))?;
        if existing {
            return self.adopt_or_reject(&capture, &final_path, &bytes).await;
        }

        let tmp = self
            .store
            .write_temp(&file_name, &bytes)
            .await
            .map_err(|source| io_error("write", &final_path, source))?;

        if let Err(source) = self.store.fsync(&tmp).await {
            self.discard(&tmp).await;
            return Err(io_error("fsync", &tmp, source));
        }
        if let Err(source) = self.store.rename(&tmp, &final_path).await {
            self.discard(&tmp).await;
            if source.kind() == io::ErrorKind::AlreadyExists {
                return Err(collision(&capture, &final_path));
            }
            return Err(io_error("rename", &final_path, source));
        }

        let mode = if capture.is_placeholder {
            ExportMode::Placeholder
        } else {
            ExportMode::Initial
        };
        let record = self
            .ledger
            .record_export(id, &final_path.display().to_string(), mode)
            .await
            .map_err(ledger_error)?;
        info!(capture_id = %id, path = %final_path.display(), mode = %mode, "Capture exported");
        Ok(record)
    }

    async fn adopt_or_reject(
        &self,
        capture: &Capture,
        final_path: &Path,
        bytes: &[u8]
    ) -> Result<ExportRecord, ExportError> {
        let on_disk = self
            .store
            .read(final_path)
            .await
            .map_err(|source| io_error("read", final_path, source))?;

        if on_disk != bytes {
            return Err(collision(capture, final_path));
        }

        let record = self
            .ledger
            .record_export(&capture.id, &final_path.display().to_string(), ExportMode::Recovery)
            .await
            .map_err(ledger_error)?;
        info!(
            capture_id = %capture.id,
            path = %final_path.display(),
            "Adopted orphaned export without rewriting"
        );
        Ok(record)
    }

    async fn discard(&self, tmp: &Path) {
        if let Err(err) = self.store.discard(tmp).await {
            warn!(path = %tmp.display(), error = %err, "Failed to remove temp file");
        }
    }
}

fn io_error(operation: &'static str, path: &Path, source: io::Error) -> ExportError {
    ExportError::Io {
        operation,
        path: path.display().to_string(),
        source
    }
}

fn collision(capture: &Capture, path: &Path) -> ExportError {
    IntegrityError::ExportCollision {
        capture_id: capture.id.to_string(),
        path: path.display().to_string()
    }
    .into()
}

fn ledger_error(err: LedgerError) -> ExportError {
    match err {
        LedgerError::Integrity(integrity) => ExportError::Integrity(integrity),
        other => ExportError::Ledger {
            reason: other.to_string()
        }
    }
}
