//! Repository implementations for SQLite-backed persistence.
//!
//! Provides SessionRepository, TranscriptRepository and ResultRepository
//! that operate on the Database struct using raw SQL.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use netguide_core::error::NetGuideError;
use netguide_core::types::{QnaPair, ResultRecord, Session, SessionStatus, TranscriptEntry};

use crate::db::Database;

const SESSION_COLUMNS: &str = "id, user_id, status, created_at, updated_at, completed_at";
const TRANSCRIPT_COLUMNS: &str =
    "id, session_id, chat, qna, assessment_analysis, created_at, updated_at";
const RESULT_COLUMNS: &str = "id, session_id, result_data, recommendations, created_at";

/// Repository for assessment sessions.
pub struct SessionRepository {
    db: Arc<Database>,
}

impl SessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new `in_progress` session.
    ///
    /// Fails with [`NetGuideError::Conflict`] when the owner already has an
    /// active session.
    pub fn insert(&self, owner: Option<&str>) -> Result<Session, NetGuideError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            owner: owner.map(str::to_string),
            status: SessionStatus::InProgress,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO assessment_sessions (id, user_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    session.id.to_string(),
                    session.owner,
                    session.status.to_string(),
                    now.timestamp_millis(),
                    now.timestamp_millis(),
                ],
            )
            .map_err(|e| map_write_error(e, "insert session"))?;
            Ok(())
        })?;

        Ok(session)
    }

    /// Find a session by ID.
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, NetGuideError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {} FROM assessment_sessions WHERE id = ?1", SESSION_COLUMNS);
            let row = conn
                .query_row(&sql, rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_session(row))
                })
                .optional()
                .map_err(|e| NetGuideError::Storage(e.to_string()))?;
            row.transpose()
        })
    }

    /// Newest `in_progress` session for an owner.
    pub fn find_active(&self, owner: &str) -> Result<Option<Session>, NetGuideError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM assessment_sessions
                 WHERE user_id = ?1 AND status = 'in_progress'
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1",
                SESSION_COLUMNS
            );
            let row = conn
                .query_row(&sql, rusqlite::params![owner], |row| Ok(row_to_session(row)))
                .optional()
                .map_err(|e| NetGuideError::Storage(e.to_string()))?;
            row.transpose()
        })
    }

    /// Move an `in_progress` session to `status`.
    ///
    /// Returns `false` when no row changed: the session is unknown or has
    /// already left `in_progress`.
    pub fn set_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, NetGuideError> {
        let updated = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE assessment_sessions
                 SET status = ?2, updated_at = ?3, completed_at = ?4
                 WHERE id = ?1 AND status = 'in_progress'",
                rusqlite::params![
                    id.to_string(),
                    status.to_string(),
                    Utc::now().timestamp_millis(),
                    completed_at.map(|t| t.timestamp_millis()),
                ],
            )
            .map_err(|e| map_write_error(e, "update session status"))
        })?;
        Ok(updated > 0)
    }

    /// Most recent sessions for an owner, newest first.
    pub fn list_by_owner(&self, owner: &str, limit: u32) -> Result<Vec<Session>, NetGuideError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM assessment_sessions
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2",
                SESSION_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| NetGuideError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![owner, limit], |row| Ok(row_to_session(row)))
                .map_err(|e| NetGuideError::Storage(e.to_string()))?;

            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row.map_err(|e| NetGuideError::Storage(e.to_string()))??);
            }
            Ok(sessions)
        })
    }
}

/// Repository for per-session transcript entries (chat seed + QnA ledger).
pub struct TranscriptRepository {
    db: Arc<Database>,
}

impl TranscriptRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create the transcript entry of a session with an empty ledger.
    pub fn insert(&self, session_id: Uuid, chat: &str) -> Result<TranscriptEntry, NetGuideError> {
        let now = Utc::now();
        let entry = TranscriptEntry {
            id: Uuid::new_v4(),
            session_id,
            chat: chat.to_string(),
            qna: Vec::new(),
            analysis: None,
            created_at: now,
            updated_at: now,
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO assessments (id, session_id, chat, qna, created_at, updated_at)
                 VALUES (?1, ?2, ?3, '[]', ?4, ?5)",
                rusqlite::params![
                    entry.id.to_string(),
                    session_id.to_string(),
                    entry.chat,
                    now.timestamp_millis(),
                    now.timestamp_millis(),
                ],
            )
            .map_err(|e| map_write_error(e, "insert transcript"))?;
            Ok(())
        })?;

        Ok(entry)
    }

    pub fn find_by_session(&self, session_id: Uuid) -> Result<Option<TranscriptEntry>, NetGuideError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM assessments WHERE session_id = ?1",
                TRANSCRIPT_COLUMNS
            );
            let row = conn
                .query_row(&sql, rusqlite::params![session_id.to_string()], |row| {
                    Ok(row_to_transcript(row))
                })
                .optional()
                .map_err(|e| NetGuideError::Storage(e.to_string()))?;
            row.transpose()
        })
    }

    /// Replace the whole QnA ledger.
    pub fn update_qna(&self, session_id: Uuid, qna: &[QnaPair]) -> Result<(), NetGuideError> {
        let json = serde_json::to_string(qna)?;
        self.update_column(session_id, "qna", json, "update qna")
    }

    pub fn update_analysis(
        &self,
        session_id: Uuid,
        analysis: &serde_json::Value,
    ) -> Result<(), NetGuideError> {
        let json = serde_json::to_string(analysis)?;
        self.update_column(session_id, "assessment_analysis", json, "update analysis")
    }

    fn update_column(
        &self,
        session_id: Uuid,
        column: &'static str,
        value: String,
        what: &str,
    ) -> Result<(), NetGuideError> {
        let updated = self.db.with_conn(|conn| {
            let sql = format!(
                "UPDATE assessments SET {} = ?2, updated_at = ?3 WHERE session_id = ?1",
                column
            );
            conn.execute(
                &sql,
                rusqlite::params![session_id.to_string(), value, Utc::now().timestamp_millis()],
            )
            .map_err(|e| map_write_error(e, what))
        })?;

        if updated == 0 {
            return Err(NetGuideError::Storage(format!(
                "Transcript not found for session {}",
                session_id
            )));
        }
        Ok(())
    }
}

/// Repository for finalized result records.
pub struct ResultRepository {
    db: Arc<Database>,
}

impl ResultRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert the result record of a session. A second insert for the same
    /// session fails with [`NetGuideError::Conflict`].
    pub fn insert(
        &self,
        session_id: Uuid,
        result: &serde_json::Value,
        recommendations: Option<&serde_json::Value>,
    ) -> Result<ResultRecord, NetGuideError> {
        let now = Utc::now();
        let record = ResultRecord {
            id: Uuid::new_v4(),
            session_id,
            result: result.clone(),
            recommendations: recommendations.cloned(),
            created_at: now,
        };
        let result_json = serde_json::to_string(result)?;
        let recommendations_json = recommendations.map(serde_json::to_string).transpose()?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO assessment_results (id, session_id, result_data, recommendations, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    record.id.to_string(),
                    session_id.to_string(),
                    result_json,
                    recommendations_json,
                    now.timestamp_millis(),
                ],
            )
            .map_err(|e| map_write_error(e, "insert result"))?;
            Ok(())
        })?;

        Ok(record)
    }

    pub fn find_by_session(&self, session_id: Uuid) -> Result<Option<ResultRecord>, NetGuideError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM assessment_results WHERE session_id = ?1",
                RESULT_COLUMNS
            );
            let row = conn
                .query_row(&sql, rusqlite::params![session_id.to_string()], |row| {
                    Ok(row_to_result(row))
                })
                .optional()
                .map_err(|e| NetGuideError::Storage(e.to_string()))?;
            row.transpose()
        })
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn map_write_error(err: rusqlite::Error, what: &str) -> NetGuideError {
    if let rusqlite::Error::SqliteFailure(ref code, _) = err {
        if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            || code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        {
            return NetGuideError::Conflict(format!("Failed to {}: {}", what, err));
        }
    }
    NetGuideError::Storage(format!("Failed to {}: {}", what, err))
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn parse_uuid(raw: &str) -> Result<Uuid, NetGuideError> {
    Uuid::parse_str(raw).map_err(|e| NetGuideError::Storage(format!("Invalid UUID: {}", e)))
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session, NetGuideError> {
    let id: String = row.get(0).map_err(|e| NetGuideError::Storage(e.to_string()))?;
    let owner: Option<String> = row.get(1).map_err(|e| NetGuideError::Storage(e.to_string()))?;
    let status: String = row.get(2).map_err(|e| NetGuideError::Storage(e.to_string()))?;
    let created_at: i64 = row.get(3).map_err(|e| NetGuideError::Storage(e.to_string()))?;
    let updated_at: i64 = row.get(4).map_err(|e| NetGuideError::Storage(e.to_string()))?;
    let completed_at: Option<i64> =
        row.get(5).map_err(|e| NetGuideError::Storage(e.to_string()))?;

    Ok(Session {
        id: parse_uuid(&id)?,
        owner,
        status: status.parse().map_err(NetGuideError::InvalidStatus)?,
        created_at: millis_to_datetime(created_at),
        updated_at: millis_to_datetime(updated_at),
        completed_at: completed_at.map(millis_to_datetime),
    })
}

fn row_to_transcript(row: &rusqlite::Row<'_>) -> Result<TranscriptEntry, NetGuideError> {
    let id: String = row.get(0).map_err(|e| NetGuideError::Storage(e.to_string()))?;
    let session_id: String = row.get(1).map_err(|e| NetGuideError::Storage(e.to_string()))?;
    let chat: String = row.get(2).map_err(|e| NetGuideError::Storage(e.to_string()))?;
    let qna: String = row.get(3).map_err(|e| NetGuideError::Storage(e.to_string()))?;
    let analysis: Option<String> =
        row.get(4).map_err(|e| NetGuideError::Storage(e.to_string()))?;
    let created_at: i64 = row.get(5).map_err(|e| NetGuideError::Storage(e.to_string()))?;
    let updated_at: i64 = row.get(6).map_err(|e| NetGuideError::Storage(e.to_string()))?;

    Ok(TranscriptEntry {
        id: parse_uuid(&id)?,
        session_id: parse_uuid(&session_id)?,
        chat,
        qna: serde_json::from_str(&qna)?,
        analysis: analysis.as_deref().map(serde_json::from_str).transpose()?,
        created_at: millis_to_datetime(created_at),
        updated_at: millis_to_datetime(updated_at),
    })
}

fn row_to_result(row: &rusqlite::Row<'_>) -> Result<ResultRecord, NetGuideError> {
    let id: String = row.get(0).map_err(|e| NetGuideError::Storage(e.to_string()))?;
    let session_id: String = row.get(1).map_err(|e| NetGuideError::Storage(e.to_string()))?;
    let result: String = row.get(2).map_err(|e| NetGuideError::Storage(e.to_string()))?;
    let recommendations: Option<String> =
        row.get(3).map_err(|e| NetGuideError::Storage(e.to_string()))?;
    let created_at: i64 = row.get(4).map_err(|e| NetGuideError::Storage(e.to_string()))?;

    Ok(ResultRecord {
        id: parse_uuid(&id)?,
        session_id: parse_uuid(&session_id)?,
        result: serde_json::from_str(&result)?,
        recommendations: recommendations
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        created_at: millis_to_datetime(created_at),
    })
}

// =============================================================================
// Tests
// =============================================================================
