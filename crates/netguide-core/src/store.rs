//! The ledger store contract.
//!
//! A narrow row-oriented CRUD surface over three tables: sessions,
//! transcript entries and result records. Every call is one independent
//! request; implementations are not expected to offer transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{QnaPair, ResultRecord, Session, SessionStatus, TranscriptEntry};

/// Durable storage for assessment sessions and their ledgers.
///
/// Implementations must reject a second `in_progress` session for the same
/// non-null owner with [`NetGuideError::Conflict`](crate::NetGuideError::Conflict),
/// and must keep at most one transcript entry and one result record per
/// session.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Newest `in_progress` session for an identified owner.
    async fn find_active_session(&self, owner: &str) -> Result<Option<Session>>;

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>>;

    /// Insert a fresh `in_progress` session.
    async fn insert_session(&self, owner: Option<&str>) -> Result<Session>;

    /// Move an `in_progress` session to `status`, storing `completed_at` as
    /// given. The update is conditional on the stored status: it returns
    /// `false` and changes nothing once the session has left `in_progress`.
    async fn set_session_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Most recent sessions for an owner, newest first.
    async fn list_sessions(&self, owner: &str, limit: u32) -> Result<Vec<Session>>;

    async fn insert_transcript(&self, session_id: Uuid, chat: &str) -> Result<TranscriptEntry>;

    async fn get_transcript(&self, session_id: Uuid) -> Result<Option<TranscriptEntry>>;

    /// Replace the whole QnA ledger of a session.
    async fn update_qna(&self, session_id: Uuid, qna: &[QnaPair]) -> Result<()>;

    async fn update_analysis(&self, session_id: Uuid, analysis: &serde_json::Value) -> Result<()>;

    async fn insert_result(
        &self,
        session_id: Uuid,
        result: &serde_json::Value,
        recommendations: Option<&serde_json::Value>,
    ) -> Result<ResultRecord>;

    async fn get_result(&self, session_id: Uuid) -> Result<Option<ResultRecord>>;
}
