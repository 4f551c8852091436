//! SQLite implementation of the [`LedgerStore`] contract.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use netguide_core::error::Result;
use netguide_core::store::LedgerStore;
use netguide_core::types::{QnaPair, ResultRecord, Session, SessionStatus, TranscriptEntry};

use crate::db::Database;
use crate::repository::{ResultRepository, SessionRepository, TranscriptRepository};

/// Ledger store backed by a shared [`Database`].
pub struct SqliteLedgerStore {
    sessions: SessionRepository,
    transcripts: TranscriptRepository,
    results: ResultRepository,
}

impl SqliteLedgerStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            sessions: SessionRepository::new(Arc::clone(&db)),
            transcripts: TranscriptRepository::new(Arc::clone(&db)),
            results: ResultRepository::new(db),
        }
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn find_active_session(&self, owner: &str) -> Result<Option<Session>> {
        self.sessions.find_active(owner)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        self.sessions.find_by_id(id)
    }

    async fn insert_session(&self, owner: Option<&str>) -> Result<Session> {
        let session = self.sessions.insert(owner)?;
        debug!(session_id = %session.id, owner = ?owner, "Session row inserted");
        Ok(session)
    }

    async fn set_session_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.sessions.set_status(id, status, completed_at)
    }

    async fn list_sessions(&self, owner: &str, limit: u32) -> Result<Vec<Session>> {
        self.sessions.list_by_owner(owner, limit)
    }

    async fn insert_transcript(&self, session_id: Uuid, chat: &str) -> Result<TranscriptEntry> {
        self.transcripts.insert(session_id, chat)
    }

    async fn get_transcript(&self, session_id: Uuid) -> Result<Option<TranscriptEntry>> {
        self.transcripts.find_by_session(session_id)
    }

    async fn update_qna(&self, session_id: Uuid, qna: &[QnaPair]) -> Result<()> {
        self.transcripts.update_qna(session_id, qna)?;
        debug!(session_id = %session_id, pairs = qna.len(), "Ledger persisted");
        Ok(())
    }

    async fn update_analysis(&self, session_id: Uuid, analysis: &serde_json::Value) -> Result<()> {
        self.transcripts.update_analysis(session_id, analysis)
    }

    async fn insert_result(
        &self,
        session_id: Uuid,
        result: &serde_json::Value,
        recommendations: Option<&serde_json::Value>,
    ) -> Result<ResultRecord> {
        self.results.insert(session_id, result, recommendations)
    }

    async fn get_result(&self, session_id: Uuid) -> Result<Option<ResultRecord>> {
        self.results.find_by_session(session_id)
    }
}
