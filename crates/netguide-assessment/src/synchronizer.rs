//! Ledger synchronizer: the only writer of transcript entries, status
//! transitions and result records.
//!
//! Every write is a whole-row replacement or a guarded insert, so retrying a
//! failed call is always safe. Failures are returned, never swallowed.

use std::sync::Arc;

use chrono::Utc;
use netguide_core::error::NetGuideError;
use netguide_core::store::LedgerStore;
use netguide_core::types::{QnaPair, ResultRecord, Session, SessionStatus, TranscriptEntry};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AssessmentError;
use crate::state_machine::validate_status_transition;

/// Everything persisted for one session, as needed to resume it.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    pub session: Session,
    pub transcript: Option<TranscriptEntry>,
    pub result: Option<ResultRecord>,
}

impl LedgerSnapshot {
    /// Answered pairs in turn order.
    pub fn qna(&self) -> &[QnaPair] {
        self.transcript
            .as_ref()
            .map(|t| t.qna.as_slice())
            .unwrap_or_default()
    }
}

pub struct LedgerSynchronizer {
    store: Arc<dyn LedgerStore>,
    question_count: usize,
}

impl LedgerSynchronizer {
    /// `question_count` is the ledger length at which a session may be
    /// analysed.
    pub fn new(store: Arc<dyn LedgerStore>, question_count: usize) -> Self {
        Self {
            store,
            question_count,
        }
    }

    pub fn question_count(&self) -> usize {
        self.question_count
    }

    pub async fn session(&self, session_id: Uuid) -> Result<Session, AssessmentError> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or(AssessmentError::SessionNotFound(session_id))
    }

    /// Load the persisted state of a session for resumption.
    pub async fn load(&self, session_id: Uuid) -> Result<LedgerSnapshot, AssessmentError> {
        let session = self.session(session_id).await?;
        let transcript = self.store.get_transcript(session_id).await?;
        let result = self.store.get_result(session_id).await?;
        Ok(LedgerSnapshot {
            session,
            transcript,
            result,
        })
    }

    pub async fn result(&self, session_id: Uuid) -> Result<Option<ResultRecord>, AssessmentError> {
        Ok(self.store.get_result(session_id).await?)
    }

    /// Create the transcript entry holding the chat seed. Returns the
    /// existing entry if the session already has one.
    pub async fn open_transcript(
        &self,
        session_id: Uuid,
        chat: &str,
    ) -> Result<TranscriptEntry, AssessmentError> {
        if let Some(existing) = self.store.get_transcript(session_id).await? {
            return Ok(existing);
        }
        match self.store.insert_transcript(session_id, chat).await {
            Ok(entry) => {
                debug!(session_id = %session_id, "Transcript opened");
                Ok(entry)
            }
            Err(NetGuideError::Conflict(_)) => self
                .store
                .get_transcript(session_id)
                .await?
                .ok_or(AssessmentError::SessionNotFound(session_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the whole ledger.
    ///
    /// The session must be `in_progress`, the stored ledger must be a prefix
    /// of `qna`, and `qna` may add at most one pair. Re-sending the stored
    /// ledger is a no-op write.
    pub async fn append_answer(
        &self,
        session_id: Uuid,
        qna: &[QnaPair],
    ) -> Result<(), AssessmentError> {
        let session = self.session(session_id).await?;
        if session.status.is_terminal() {
            return Err(AssessmentError::SessionClosed {
                session_id,
                status: session.status,
            });
        }

        let stored = self
            .store
            .get_transcript(session_id)
            .await?
            .ok_or(AssessmentError::SessionNotFound(session_id))?;

        if qna.len() < stored.qna.len() {
            return Err(AssessmentError::LedgerRegression {
                session_id,
                stored: stored.qna.len(),
                attempted: qna.len(),
            });
        }
        if qna.len() > stored.qna.len() + 1 {
            return Err(AssessmentError::LedgerGap {
                session_id,
                stored: stored.qna.len(),
                attempted: qna.len(),
            });
        }
        if let Some(position) = stored.qna.iter().zip(qna).position(|(a, b)| a != b) {
            return Err(AssessmentError::LedgerDiverged {
                session_id,
                position,
            });
        }

        self.store.update_qna(session_id, qna).await?;
        debug!(session_id = %session_id, pairs = qna.len(), "Ledger synchronized");
        Ok(())
    }

    /// Apply a validated status transition.
    ///
    /// Returns `false` without writing when the session already has
    /// `status`. The store only moves sessions out of `in_progress`, so a
    /// competing transition that lands first is reported rather than
    /// overwritten.
    pub async fn mark_status(
        &self,
        session_id: Uuid,
        status: SessionStatus,
    ) -> Result<bool, AssessmentError> {
        let session = self.session(session_id).await?;
        if session.status == status {
            return Ok(false);
        }
        validate_status_transition(session.status, status)?;

        let completed_at = (status == SessionStatus::Completed).then(Utc::now);
        let changed = self
            .store
            .set_session_status(session_id, status, completed_at)
            .await?;
        if !changed {
            let current = self.session(session_id).await?;
            if current.status == status {
                debug!(session_id = %session_id, status = %status, "Status already set by another writer");
                return Ok(false);
            }
            return Err(AssessmentError::InvalidTransition(
                current.status.to_string(),
                status.to_string(),
            ));
        }
        info!(session_id = %session_id, from = %session.status, to = %status, "Session status changed");
        Ok(true)
    }

    /// Store the analysis once the ledger is full.
    ///
    /// Returns `false` without writing when an analysis is already stored.
    pub async fn write_analysis(
        &self,
        session_id: Uuid,
        analysis: &Value,
    ) -> Result<bool, AssessmentError> {
        self.ensure_not_abandoned(session_id).await?;
        let stored = self
            .store
            .get_transcript(session_id)
            .await?
            .ok_or(AssessmentError::SessionNotFound(session_id))?;

        if stored.analysis.is_some() {
            return Ok(false);
        }
        if stored.qna.len() < self.question_count {
            return Err(AssessmentError::LedgerIncomplete {
                session_id,
                len: stored.qna.len(),
                required: self.question_count,
            });
        }

        self.store.update_analysis(session_id, analysis).await?;
        debug!(session_id = %session_id, "Analysis stored");
        Ok(true)
    }

    /// Create the result record of a session, or return the one that
    /// already exists.
    pub async fn write_result(
        &self,
        session_id: Uuid,
        result: &Value,
        recommendations: Option<&Value>,
    ) -> Result<ResultRecord, AssessmentError> {
        if let Some(existing) = self.store.get_result(session_id).await? {
            return Ok(existing);
        }
        self.ensure_not_abandoned(session_id).await?;
        match self
            .store
            .insert_result(session_id, result, recommendations)
            .await
        {
            Ok(record) => {
                info!(session_id = %session_id, result_id = %record.id, "Result recorded");
                Ok(record)
            }
            Err(NetGuideError::Conflict(_)) => self
                .store
                .get_result(session_id)
                .await?
                .ok_or(AssessmentError::SessionNotFound(session_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_not_abandoned(&self, session_id: Uuid) -> Result<(), AssessmentError> {
        let session = self.session(session_id).await?;
        if session.status == SessionStatus::Abandoned {
            return Err(AssessmentError::SessionClosed {
                session_id,
                status: session.status,
            });
        }
        Ok(())
    }
}
