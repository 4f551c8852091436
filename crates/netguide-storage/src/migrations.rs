//! Database schema migrations.
//!
//! Applies the initial schema: assessment_sessions, assessments,
//! assessment_results and the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use netguide_core::error::NetGuideError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), NetGuideError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| NetGuideError::Storage(format!("Failed to create migrations table: {}", e)))?;

    if schema_version(conn)? < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: assessment_ledger");
    }

    Ok(())
}

/// Highest applied migration version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<i64, NetGuideError> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| NetGuideError::Storage(format!("Failed to query migration version: {}", e)))
}

/// Version 1: sessions, transcript entries and result records.
///
/// Timestamps are unix milliseconds. JSON columns hold serialized
/// `serde_json::Value`s.
fn apply_v1(conn: &Connection) -> Result<(), NetGuideError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS assessment_sessions (
            id              TEXT PRIMARY KEY NOT NULL,
            user_id         TEXT,
            status          TEXT NOT NULL DEFAULT 'in_progress'
                            CHECK (status IN ('in_progress', 'completed', 'abandoned')),
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            completed_at    INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_user_created
            ON assessment_sessions (user_id, created_at DESC);

        -- At most one in-progress session per identified owner. NULL owners
        -- never collide in a SQLite unique index.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_active
            ON assessment_sessions (user_id)
            WHERE status = 'in_progress';

        CREATE TABLE IF NOT EXISTS assessments (
            id                  TEXT PRIMARY KEY NOT NULL,
            session_id          TEXT NOT NULL UNIQUE,
            chat                TEXT NOT NULL DEFAULT '',
            qna                 TEXT NOT NULL DEFAULT '[]',
            assessment_analysis TEXT,
            created_at          INTEGER NOT NULL,
            updated_at          INTEGER NOT NULL,
            FOREIGN KEY (session_id) REFERENCES assessment_sessions(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS assessment_results (
            id              TEXT PRIMARY KEY NOT NULL,
            session_id      TEXT NOT NULL UNIQUE,
            result_data     TEXT NOT NULL,
            recommendations TEXT,
            created_at      INTEGER NOT NULL,
            FOREIGN KEY (session_id) REFERENCES assessment_sessions(id) ON DELETE CASCADE
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'assessment_ledger');
        ",
    )
    .map_err(|e| NetGuideError::Storage(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}
