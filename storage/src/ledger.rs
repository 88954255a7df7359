//! # Staging Ledger
//!
//! Durable state machine with one row per capture, plus the append-only
//! `export_records` and `error_events` audit relations and the per-source
//! `sync_cursors`.
//!
//! All mutations go through a single async mutex and a single-connection
//! pool, so every transition is one serialized SQLite transaction.
//!
//! ## Deduplication
//! A partial unique index allows one live holder per `content_identity`
//! (rows in `exported_duplicate` or `quarantined` are excluded). Binding an
//! identity that already has a holder turns the capture into
//! `exported_duplicate` in the same transaction. Losing a uniqueness race
//! re-reads and lands on the same duplicate path.
//!
//! A quarantined capture gives up its identity: later captures with the same
//! content export normally, and an operator reset clears the stored identity
//! so reprocessing binds it afresh.
//!
//! ## Attempt history
//! `prior_attempts` counts error events for a stage newer than both the last
//! escalated event and the operator reset watermark (`dlq_cleared_through`).

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use capture_core::{
    AttemptJournal, Capture, CaptureId, CaptureStatus, ContentIdentity, ErrorEvent,
    EscalationAction, ExportMode, ExportRecord, NewErrorEvent, RawItem, Source, Stage
};
use errors::IntegrityError;
use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous
};
use sqlx::{Pool, Row, Sqlite};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::schema;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt ledger row: {0}")]
    Decode(String)
}

impl LedgerError {
    pub fn as_integrity(&self) -> Option<&IntegrityError> {
        match self {
            LedgerError::Integrity(err) => Some(err),
            _ => None
        }
    }

    fn is_unique_violation(&self) -> bool {
        match self {
            LedgerError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Staged(CaptureId),
    /// `(source, external_id)` was already staged under this id.
    DuplicateSkipped(CaptureId)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Bound,
    Duplicate { of: CaptureId }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed,
    Duplicate { of: CaptureId }
}

/// A dead-lettered capture with the event that put it there.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub capture: Capture,
    pub event: ErrorEvent
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub by_status: BTreeMap<String, i64>,
    pub dead_lettered: i64,
    pub export_records: i64,
    pub error_events: i64
}

pub struct StagingLedger {
    pool: Pool<Sqlite>,
    write_lock: Mutex<()>
}

impl StagingLedger {
    /// Opens (creating if needed) the ledger at `database_url` and applies
    /// the schema.
    pub async fn connect(database_url: &str, busy_timeout: Duration) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let ledger = Self {
            pool,
            write_lock: Mutex::new(())
        };
        ledger.initialize_schema().await?;
        debug!(database_url, "Staging ledger opened");
        Ok(ledger)
    }

    pub async fn in_memory() -> Result<Self, LedgerError> {
        Self::connect("sqlite::memory:", Duration::from_secs(5)).await
    }

    pub async fn initialize_schema(&self) -> Result<(), LedgerError> {
        schema::apply(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Records a newly discovered item. Re-delivery of the same
    /// `(source, external_id)` is reported, not re-staged.
    pub async fn stage(&self, item: &RawItem) -> Result<StageOutcome, LedgerError> {
        let _guard = self.write_lock.lock().await;
        let id = utils::generate_capture_id();
        let now = now_millis();
        let metadata = serde_json::to_string(&item.metadata)?;

        let result = sqlx::query(
            "INSERT INTO captures
             (id, source, external_id, payload_ref, status, source_metadata,
              discovered_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT (source, external_id) DO NOTHING"
        )
        .bind(id.as_str())
        .bind(item.source.to_string())
        .bind(&item.external_id)
        .bind(&item.payload_ref)
        .bind(CaptureStatus::Staged.to_string())
        .bind(metadata)
        .bind(item.discovered_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            info!(capture_id = %id, source = %item.source, external_id = %item.external_id, "Capture staged");
            return Ok(StageOutcome::Staged(id));
        }

        let existing: String =
            sqlx::query_scalar("SELECT id FROM captures WHERE source = ?1 AND external_id = ?2")
                .bind(item.source.to_string())
                .bind(&item.external_id)
                .fetch_one(&self.pool)
                .await?;
        debug!(capture_id = %existing, external_id = %item.external_id, "Item already staged");
        Ok(StageOutcome::DuplicateSkipped(CaptureId::new(existing)))
    }

    pub async fn get(&self, id: &CaptureId) -> Result<Option<Capture>, LedgerError> {
        let row = sqlx::query("SELECT * FROM captures WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(capture_from_row).transpose()
    }

    pub async fn find_by_external_id(
        &self,
        source: Source,
        external_id: &str
    ) -> Result<Option<Capture>, LedgerError> {
        let row = sqlx::query("SELECT * FROM captures WHERE source = ?1 AND external_id = ?2")
            .bind(source.to_string())
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(capture_from_row).transpose()
    }

    pub async fn status_of(&self, id: &CaptureId) -> Result<Option<CaptureStatus>, LedgerError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM captures WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        status.map(|s| parse("status", &s)).transpose()
    }

    /// Binds an identity to a staged capture before processing (the cheap
    /// audio fingerprint). An identity that already has a holder finishes the
    /// capture as `exported_duplicate`.
    pub async fn bind_identity(
        &self,
        id: &CaptureId,
        identity: &ContentIdentity
    ) -> Result<BindOutcome, LedgerError> {
        let _guard = self.write_lock.lock().await;
        match self.try_bind(id, identity).await {
            Err(err) if err.is_unique_violation() => {
                warn!(capture_id = %id, identity = %identity, "Identity race lost, re-reading");
                self.try_bind(id, identity).await
            }
            other => other
        }
    }

    async fn try_bind(
        &self,
        id: &CaptureId,
        identity: &ContentIdentity
    ) -> Result<BindOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let capture = load(&mut tx, id).await?;

        if let Some(existing) = &capture.content_identity {
            if existing == identity {
                return Ok(BindOutcome::Bound);
            }
            return Err(IntegrityError::IdentityMismatch {
                capture_id: id.to_string(),
                existing: existing.to_string(),
                proposed: identity.to_string()
            }
            .into());
        }
        if capture.status != CaptureStatus::Staged {
            return Err(IntegrityError::InvalidTransition {
                from: capture.status.to_string(),
                to: CaptureStatus::Processed.to_string()
            }
            .into());
        }

        if let Some(owner) = identity_owner(&mut tx, identity, id).await? {
            mark_duplicate(&mut tx, &capture, identity, &owner, None).await?;
            tx.commit().await?;
            info!(capture_id = %id, duplicate_of = %owner, "Capture is a duplicate");
            return Ok(BindOutcome::Duplicate { of: owner });
        }

        sqlx::query("UPDATE captures SET content_identity = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(identity.as_str())
            .bind(now_millis())
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(capture_id = %id, identity = %identity, "Identity bound");
        Ok(BindOutcome::Bound)
    }

    /// `staged → processed` with the normalized content. The identity is
    /// checked again here; a match finishes the capture as
    /// `exported_duplicate` instead.
    pub async fn complete_processing(
        &self,
        id: &CaptureId,
        identity: Option<&ContentIdentity>,
        content: &str
    ) -> Result<ProcessOutcome, LedgerError> {
        let _guard = self.write_lock.lock().await;
        match self.try_complete(id, identity, content).await {
            Err(err) if err.is_unique_violation() => {
                warn!(capture_id = %id, "Identity race lost, re-reading");
                self.try_complete(id, identity, content).await
            }
            other => other
        }
    }

    async fn try_complete(
        &self,
        id: &CaptureId,
        identity: Option<&ContentIdentity>,
        content: &str
    ) -> Result<ProcessOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let capture = load(&mut tx, id).await?;
        let next = capture.status.transition(CaptureStatus::Processed)?;

        let identity = match (identity, &capture.content_identity) {
            (Some(proposed), Some(existing)) if proposed != existing => {
                return Err(IntegrityError::IdentityMismatch {
                    capture_id: id.to_string(),
                    existing: existing.to_string(),
                    proposed: proposed.to_string()
                }
                .into());
            }
            (Some(proposed), _) => Some(proposed.clone()),
            (None, existing) => existing.clone()
        };

        if let Some(identity) = &identity {
            if let Some(owner) = identity_owner(&mut tx, identity, id).await? {
                mark_duplicate(&mut tx, &capture, identity, &owner, Some(content)).await?;
                tx.commit().await?;
                info!(capture_id = %id, duplicate_of = %owner, "Capture is a duplicate");
                return Ok(ProcessOutcome::Duplicate { of: owner });
            }
        }

        sqlx::query(
            "UPDATE captures
             SET status = ?1, content_identity = ?2, raw_content = ?3, is_placeholder = 0,
                 attempt_count = 0, last_attempt_at = NULL, updated_at = ?4
             WHERE id = ?5"
        )
        .bind(next.to_string())
        .bind(identity.as_ref().map(ContentIdentity::as_str))
        .bind(content)
        .bind(now_millis())
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        debug!(capture_id = %id, "Capture processed");
        Ok(ProcessOutcome::Processed)
    }

    /// `staged → processed` with a placeholder body standing in for content
    /// that could not be produced. The following export ends in
    /// `exported_placeholder`.
    pub async fn process_as_placeholder(
        &self,
        id: &CaptureId,
        body: &str
    ) -> Result<Capture, LedgerError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let capture = load(&mut tx, id).await?;
        let next = capture.status.transition(CaptureStatus::Processed)?;

        sqlx::query(
            "UPDATE captures
             SET status = ?1, raw_content = ?2, is_placeholder = 1,
                 attempt_count = 0, last_attempt_at = NULL, updated_at = ?3
             WHERE id = ?4"
        )
        .bind(next.to_string())
        .bind(body)
        .bind(now_millis())
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;
        let updated = load(&mut tx, id).await?;
        tx.commit().await?;
        warn!(capture_id = %id, "Capture processed as placeholder");
        Ok(updated)
    }

    /// Called only after the artifact is durably at `destination`.
    /// `processed → exported` (or `exported_placeholder`) plus the audit row,
    /// in one transaction.
    pub async fn record_export(
        &self,
        id: &CaptureId,
        destination: &str,
        mode: ExportMode
    ) -> Result<ExportRecord, LedgerError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let capture = load(&mut tx, id).await?;
        let target = if capture.is_placeholder {
            CaptureStatus::ExportedPlaceholder
        } else {
            CaptureStatus::Exported
        };
        let next = capture.status.transition(target)?;
        let now = now_millis();

        sqlx::query(
            "UPDATE captures
             SET status = ?1, attempt_count = 0, last_attempt_at = NULL, updated_at = ?2
             WHERE id = ?3"
        )
        .bind(next.to_string())
        .bind(now)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;

        let record = insert_export(
            &mut tx,
            id,
            Some(destination),
            capture.content_identity.as_ref(),
            mode,
            None,
            now
        )
        .await?;
        tx.commit().await?;
        info!(capture_id = %id, destination, mode = %mode, status = %next, "Export recorded");
        Ok(record)
    }

    /// Any non-terminal status `→ quarantined`, together with the
    /// `IdentityCollision` event that explains it. The event message becomes
    /// the quarantine reason.
    pub async fn quarantine(&self, event: NewErrorEvent) -> Result<Capture, LedgerError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let id = event.capture_id.clone();
        let capture = load(&mut tx, &id).await?;
        let next = capture.status.transition(CaptureStatus::Quarantined)?;
        let now = now_millis();

        let recorded = insert_error(&mut tx, event, now).await?;
        sqlx::query(
            "UPDATE captures SET status = ?1, quarantine_reason = ?2, updated_at = ?3 WHERE id = ?4"
        )
        .bind(next.to_string())
        .bind(&recorded.message)
        .bind(now)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;
        let updated = load(&mut tx, &id).await?;
        tx.commit().await?;
        warn!(capture_id = %id, reason = %recorded.message, "Capture quarantined");
        Ok(updated)
    }

    /// Appends an error event and mirrors the attempt counter onto the
    /// capture row.
    pub async fn append_error(&self, event: NewErrorEvent) -> Result<ErrorEvent, LedgerError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let recorded = insert_error(&mut tx, event, now_millis()).await?;
        tx.commit().await?;
        Ok(recorded)
    }

    /// The latest escalation of a still-`staged` capture when it asked for a
    /// placeholder that was never stored. Events before an operator reset
    /// do not count.
    pub async fn unconsumed_placeholder(
        &self,
        id: &CaptureId
    ) -> Result<Option<ErrorEvent>, LedgerError> {
        let row = sqlx::query(
            "SELECT e.* FROM error_events e
             JOIN captures c ON c.id = e.capture_id
             WHERE e.capture_id = ?1
               AND c.status = 'staged'
               AND e.id > c.dlq_cleared_through
               AND e.escalation_action IS NOT NULL
             ORDER BY e.id DESC LIMIT 1"
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let event = row.as_ref().map(error_event_from_row).transpose()?;
        Ok(event.filter(|event| {
            event.escalation_action == Some(EscalationAction::ExportPlaceholder)
        }))
    }

    pub async fn attempts_since_reset(
        &self,
        id: &CaptureId,
        stage: Stage
    ) -> Result<u32, LedgerError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM error_events e
             WHERE e.capture_id = ?1 AND e.stage = ?2
               AND e.id > (SELECT dlq_cleared_through FROM captures WHERE id = ?1)
               AND e.id > COALESCE(
                   (SELECT MAX(id) FROM error_events
                    WHERE capture_id = ?1 AND escalation_action IS NOT NULL),
                   0)"
        )
        .bind(id.as_str())
        .bind(stage.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Non-terminal captures outside the dead-letter queue, oldest first.
    pub async fn pending_for_recovery(&self) -> Result<Vec<Capture>, LedgerError> {
        let rows = sqlx::query(
            "SELECT c.* FROM captures c
             WHERE c.status IN ('staged', 'processed')
               AND NOT EXISTS (
                   SELECT 1 FROM error_events e
                   WHERE e.capture_id = c.id AND e.dead_lettered = 1
                     AND e.id > c.dlq_cleared_through)
             ORDER BY c.created_at ASC, c.id ASC"
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(capture_from_row).collect()
    }

    pub async fn list_quarantined(&self) -> Result<Vec<Capture>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM captures WHERE status = 'quarantined' ORDER BY updated_at ASC, id ASC"
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(capture_from_row).collect()
    }

    /// The dead-letter queue: captures whose latest dead-lettering event is
    /// newer than their reset watermark. A view over `error_events`, never
    /// stored separately.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, LedgerError> {
        let rows = sqlx::query(
            "SELECT e.* FROM error_events e
             JOIN captures c ON c.id = e.capture_id
             WHERE e.dead_lettered = 1
               AND e.id > c.dlq_cleared_through
               AND e.id = (SELECT MAX(id) FROM error_events
                           WHERE capture_id = e.capture_id AND dead_lettered = 1)
             ORDER BY e.id ASC"
        )
        .fetch_all(&self.pool)
        .await?;

        let mut letters = Vec::with_capacity(rows.len());
        for row in &rows {
            let event = error_event_from_row(row)?;
            let capture = self.get(&event.capture_id).await?.ok_or_else(|| {
                IntegrityError::UnknownCapture {
                    capture_id: event.capture_id.to_string()
                }
            })?;
            letters.push(DeadLetter { capture, event });
        }
        Ok(letters)
    }

    pub async fn is_dead_lettered(&self, id: &CaptureId) -> Result<bool, LedgerError> {
        let dead: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM error_events e JOIN captures c ON c.id = e.capture_id
                 WHERE e.capture_id = ?1 AND e.dead_lettered = 1
                   AND e.id > c.dlq_cleared_through)"
        )
        .bind(id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(dead)
    }

    pub async fn export_records(&self, id: &CaptureId) -> Result<Vec<ExportRecord>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM export_records WHERE capture_id = ?1 ORDER BY id ASC")
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(export_record_from_row).collect()
    }

    pub async fn latest_export(&self, id: &CaptureId) -> Result<Option<ExportRecord>, LedgerError> {
        let row = sqlx::query(
            "SELECT * FROM export_records WHERE capture_id = ?1 ORDER BY id DESC LIMIT 1"
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(export_record_from_row).transpose()
    }

    pub async fn error_events(&self, id: &CaptureId) -> Result<Vec<ErrorEvent>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM error_events WHERE capture_id = ?1 ORDER BY id ASC")
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(error_event_from_row).collect()
    }

    /// Operator reset. A quarantined capture returns to `staged` without its
    /// identity; a dead-lettered one keeps its status. Either way earlier
    /// error events stop counting and the capture leaves the dead-letter
    /// queue.
    pub async fn reset_to_pending(&self, id: &CaptureId) -> Result<Capture, LedgerError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let capture = load(&mut tx, id).await?;

        let watermark: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(id), 0) FROM error_events WHERE capture_id = ?1"
        )
        .bind(id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let dead: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM error_events
                            WHERE capture_id = ?1 AND dead_lettered = 1 AND id > ?2)"
        )
        .bind(id.as_str())
        .bind(capture.dlq_cleared_through)
        .fetch_one(&mut *tx)
        .await?;

        let status = match capture.status.reset_target() {
            Some(target) => target,
            None if dead && !capture.is_terminal() => capture.status,
            None => {
                return Err(IntegrityError::InvalidTransition {
                    from: capture.status.to_string(),
                    to: CaptureStatus::Staged.to_string()
                }
                .into());
            }
        };

        let identity = if capture.status == CaptureStatus::Quarantined {
            None
        } else {
            capture.content_identity.as_ref()
        };
        sqlx::query(
            "UPDATE captures
             SET status = ?1, content_identity = ?2, quarantine_reason = NULL,
                 dlq_cleared_through = ?3, attempt_count = 0, last_attempt_at = NULL,
                 updated_at = ?4
             WHERE id = ?5"
        )
        .bind(status.to_string())
        .bind(identity.map(ContentIdentity::as_str))
        .bind(watermark)
        .bind(now_millis())
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;
        let updated = load(&mut tx, id).await?;
        tx.commit().await?;
        info!(capture_id = %id, from = %capture.status, to = %status, "Capture reset by operator");
        Ok(updated)
    }

    pub async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM captures GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut by_status = BTreeMap::new();
        for row in &rows {
            by_status.insert(row.try_get::<String, _>("status")?, row.try_get::<i64, _>("n")?);
        }

        let dead_lettered: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT e.capture_id) FROM error_events e
             JOIN captures c ON c.id = e.capture_id
             WHERE e.dead_lettered = 1 AND e.id > c.dlq_cleared_through"
        )
        .fetch_one(&self.pool)
        .await?;
        let export_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM export_records")
            .fetch_one(&self.pool)
            .await?;
        let error_events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM error_events")
            .fetch_one(&self.pool)
            .await?;

        Ok(LedgerStats {
            by_status,
            dead_lettered,
            export_records,
            error_events
        })
    }

    pub async fn get_cursor(&self, source: Source) -> Result<Option<String>, LedgerError> {
        let cursor: Option<Option<String>> =
            sqlx::query_scalar("SELECT cursor FROM sync_cursors WHERE source = ?1")
                .bind(source.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(cursor.flatten())
    }

    pub async fn set_cursor(&self, source: Source, cursor: Option<&str>) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT INTO sync_cursors (source, cursor, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (source) DO UPDATE
             SET cursor = excluded.cursor, updated_at = excluded.updated_at"
        )
        .bind(source.to_string())
        .bind(cursor)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Clears the cursor so the poller re-bootstraps from the beginning.
    pub async fn reset_cursor(&self, source: Source) -> Result<(), LedgerError> {
        self.set_cursor(source, None).await?;
        warn!(source = %source, "Sync cursor reset");
        Ok(())
    }
}

#[async_trait]
impl AttemptJournal for StagingLedger {
    type Error = LedgerError;

    async fn current_status(&self, id: &CaptureId) -> Result<Option<CaptureStatus>, LedgerError> {
        self.status_of(id).await
    }

    async fn prior_attempts(&self, id: &CaptureId, stage: Stage) -> Result<u32, LedgerError> {
        self.attempts_since_reset(id, stage).await
    }

    async fn record_error(&self, event: NewErrorEvent) -> Result<ErrorEvent, LedgerError> {
        self.append_error(event).await
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn load(conn: &mut SqliteConnection, id: &CaptureId) -> Result<Capture, LedgerError> {
    let row = sqlx::query("SELECT * FROM captures WHERE id = ?1")
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => capture_from_row(&row),
        None => Err(IntegrityError::UnknownCapture {
            capture_id: id.to_string()
        }
        .into())
    }
}

async fn identity_owner(
    conn: &mut SqliteConnection,
    identity: &ContentIdentity,
    exclude: &CaptureId
) -> Result<Option<CaptureId>, LedgerError> {
    let owner: Option<String> = sqlx::query_scalar(
        "SELECT id FROM captures
         WHERE content_identity = ?1
           AND status NOT IN ('exported_duplicate', 'quarantined')
           AND id != ?2
         LIMIT 1"
    )
    .bind(identity.as_str())
    .bind(exclude.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(owner.map(CaptureId::new))
}

/// `staged → processed → exported_duplicate` (or `processed →
/// exported_duplicate`) plus a `duplicate_skip` audit row pointing at the
/// owner's file when it has one.
async fn mark_duplicate(
    conn: &mut SqliteConnection,
    capture: &Capture,
    identity: &ContentIdentity,
    owner: &CaptureId,
    content: Option<&str>
) -> Result<ExportRecord, LedgerError> {
    let via = if capture.status == CaptureStatus::Staged {
        CaptureStatus::Staged.transition(CaptureStatus::Processed)?
    } else {
        capture.status
    };
    let next = via.transition(CaptureStatus::ExportedDuplicate)?;
    let now = now_millis();

    sqlx::query(
        "UPDATE captures
         SET status = ?1, content_identity = ?2, raw_content = COALESCE(?3, raw_content),
             attempt_count = 0, last_attempt_at = NULL, updated_at = ?4
         WHERE id = ?5"
    )
    .bind(next.to_string())
    .bind(identity.as_str())
    .bind(content)
    .bind(now)
    .bind(capture.id.as_str())
    .execute(&mut *conn)
    .await?;

    let owner_path: Option<String> = sqlx::query_scalar(
        "SELECT destination_path FROM export_records
         WHERE capture_id = ?1 AND destination_path IS NOT NULL
         ORDER BY id DESC LIMIT 1"
    )
    .bind(owner.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    insert_export(
        conn,
        &capture.id,
        owner_path.as_deref(),
        Some(identity),
        ExportMode::DuplicateSkip,
        Some(owner),
        now
    )
    .await
}

async fn insert_error(
    conn: &mut SqliteConnection,
    event: NewErrorEvent,
    now: i64
) -> Result<ErrorEvent, LedgerError> {
    let result = sqlx::query(
        "INSERT INTO error_events
         (capture_id, stage, error_kind, message, attempt_number,
          escalation_action, dead_lettered, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
    )
    .bind(event.capture_id.as_str())
    .bind(event.stage.to_string())
    .bind(event.error_kind.to_string())
    .bind(&event.message)
    .bind(i64::from(event.attempt_number))
    .bind(event.escalation_action.map(|action| action.to_string()))
    .bind(event.dead_lettered)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    let id = result.last_insert_rowid();

    let updated = sqlx::query(
        "UPDATE captures SET attempt_count = ?1, last_attempt_at = ?2, updated_at = ?2
         WHERE id = ?3"
    )
    .bind(i64::from(event.attempt_number))
    .bind(now)
    .bind(event.capture_id.as_str())
    .execute(&mut *conn)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(IntegrityError::UnknownCapture {
            capture_id: event.capture_id.to_string()
        }
        .into());
    }

    Ok(ErrorEvent {
        id,
        capture_id: event.capture_id,
        stage: event.stage,
        error_kind: event.error_kind,
        message: event.message,
        attempt_number: event.attempt_number,
        escalation_action: event.escalation_action,
        dead_lettered: event.dead_lettered,
        created_at: now
    })
}

async fn insert_export(
    conn: &mut SqliteConnection,
    capture_id: &CaptureId,
    destination: Option<&str>,
    identity: Option<&ContentIdentity>,
    mode: ExportMode,
    duplicate_of: Option<&CaptureId>,
    now: i64
) -> Result<ExportRecord, LedgerError> {
    let result = sqlx::query(
        "INSERT INTO export_records
         (capture_id, destination_path, content_identity, mode, duplicate_of, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
    )
    .bind(capture_id.as_str())
    .bind(destination)
    .bind(identity.map(ContentIdentity::as_str))
    .bind(mode.to_string())
    .bind(duplicate_of.map(CaptureId::as_str))
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(ExportRecord {
        id: result.last_insert_rowid(),
        capture_id: capture_id.clone(),
        destination_path: destination.map(str::to_string),
        content_identity: identity.cloned(),
        mode,
        duplicate_of: duplicate_of.cloned(),
        created_at: now
    })
}

fn parse<T: FromStr>(column: &str, value: &str) -> Result<T, LedgerError> {
    value
        .parse()
        .map_err(|_| LedgerError::Decode(format!("{column} = {value:?}")))
}

fn capture_from_row(row: &SqliteRow) -> Result<Capture, LedgerError> {
    let metadata: String = row.try_get("source_metadata")?;
    let attempt_count: i64 = row.try_get("attempt_count")?;
    Ok(Capture {
        id: CaptureId::new(row.try_get::<String, _>("id")?),
        source: parse("source", &row.try_get::<String, _>("source")?)?,
        external_id: row.try_get("external_id")?,
        payload_ref: row.try_get("payload_ref")?,
        content_identity: row
            .try_get::<Option<String>, _>("content_identity")?
            .map(ContentIdentity::new),
        raw_content: row.try_get("raw_content")?,
        is_placeholder: row.try_get("is_placeholder")?,
        status: parse("status", &row.try_get::<String, _>("status")?)?,
        attempt_count: u32::try_from(attempt_count).unwrap_or(u32::MAX),
        last_attempt_at: row.try_get("last_attempt_at")?,
        source_metadata: serde_json::from_str(&metadata)?,
        quarantine_reason: row.try_get("quarantine_reason")?,
        dlq_cleared_through: row.try_get("dlq_cleared_through")?,
        discovered_at: row.try_get("discovered_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?
    })
}

fn export_record_from_row(row: &SqliteRow) -> Result<ExportRecord, LedgerError> {
    Ok(ExportRecord {
        id: row.try_get("id")?,
        capture_id: CaptureId::new(row.try_get::<String, _>("capture_id")?),
        destination_path: row.try_get("destination_path")?,
        content_identity: row
            .try_get::<Option<String>, _>("content_identity")?
            .map(ContentIdentity::new),
        mode: parse("mode", &row.try_get::<String, _>("mode")?)?,
        duplicate_of: row
            .try_get::<Option<String>, _>("duplicate_of")?
            .map(CaptureId::new),
        created_at: row.try_get("created_at")?
    })
}

fn error_event_from_row(row: &SqliteRow) -> Result<ErrorEvent, LedgerError> {
    let attempt_number: i64 = row.try_get("attempt_number")?;
    Ok(ErrorEvent {
        id: row.try_get("id")?,
        capture_id: CaptureId::new(row.try_get::<String, _>("capture_id")?),
        stage: parse("stage", &row.try_get::<String, _>("stage")?)?,
        error_kind: parse("error_kind", &row.try_get::<String, _>("error_kind")?)?,
        message: row.try_get("message")?,
        attempt_number: u32::try_from(attempt_number).unwrap_or(u32::MAX),
        escalation_action: row
            .try_get::<Option<String>, _>("escalation_action")?
            .map(|action| parse("escalation_action", &action))
            .transpose()?,
        dead_lettered: row.try_get("dead_lettered")?,
        created_at: row.try_get("created_at")?
    })
}
