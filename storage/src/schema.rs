//! Ledger schema. Statements are idempotent and applied one at a time.

use sqlx::{Pool, Sqlite};

const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS captures (
        id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        external_id TEXT NOT NULL,
        payload_ref TEXT NOT NULL,
        content_identity TEXT,
        raw_content TEXT,
        is_placeholder INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        last_attempt_at INTEGER,
        source_metadata TEXT NOT NULL DEFAULT '{}',
        quarantine_reason TEXT,
        dlq_cleared_through INTEGER NOT NULL DEFAULT 0,
        discovered_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE (source, external_id)
    )",
    // One live holder per identity; duplicates and quarantined rows keep the
    // value for audit.
    "DROP INDEX IF EXISTS idx_captures_identity",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_captures_live_identity
        ON captures(content_identity)
        WHERE content_identity IS NOT NULL
          AND status NOT IN ('exported_duplicate', 'quarantined')",
    "CREATE INDEX IF NOT EXISTS idx_captures_status_created
        ON captures(status, created_at, id)",
    "CREATE TABLE IF NOT EXISTS export_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        capture_id TEXT NOT NULL REFERENCES captures(id),
        destination_path TEXT,
        content_identity TEXT,
        mode TEXT NOT NULL,
        duplicate_of TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_export_records_capture ON export_records(capture_id)",
    "CREATE TABLE IF NOT EXISTS error_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        capture_id TEXT NOT NULL REFERENCES captures(id),
        stage TEXT NOT NULL,
        error_kind TEXT NOT NULL,
        message TEXT NOT NULL,
        attempt_number INTEGER NOT NULL,
        escalation_action TEXT,
        dead_lettered INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_error_events_capture_stage
        ON error_events(capture_id, stage)",
    "CREATE TABLE IF NOT EXISTS sync_cursors (
        source TEXT PRIMARY KEY,
        cursor TEXT,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TRIGGER IF NOT EXISTS export_records_no_update
        BEFORE UPDATE ON export_records
        BEGIN SELECT RAISE(ABORT, 'export_records is append-only'); END",
    "CREATE TRIGGER IF NOT EXISTS export_records_no_delete
        BEFORE DELETE ON export_records
        BEGIN SELECT RAISE(ABORT, 'export_records is append-only'); END",
    "CREATE TRIGGER IF NOT EXISTS error_events_no_update
        BEFORE UPDATE ON error_events
        BEGIN SELECT RAISE(ABORT, 'error_events is append-only'); END",
    "CREATE TRIGGER IF NOT EXISTS error_events_no_delete
        BEFORE DELETE ON error_events
        BEGIN SELECT RAISE(ABORT, 'error_events is append-only'); END"
];

pub async fn apply(pool: &Pool<Sqlite>) -> Result<(), sqlx::Error> {
    for statement in STATEMENTS {
        sqlx::query(*statement).execute(pool).await?;
    }
    Ok(())
}
