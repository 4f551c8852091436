//! Error types for the assessment orchestrator.

use netguide_core::error::NetGuideError;
use netguide_core::types::SessionStatus;
use uuid::Uuid;

use crate::state_machine::Phase;

/// Errors from session resolution, turn-taking, ledger synchronization and
/// report materialization.
#[derive(Debug, thiserror::Error)]
pub enum AssessmentError {
    #[error("ledger store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("reasoning service unreachable: {0}")]
    ServiceUnreachable(String),
    #[error("reasoning service error: {0}")]
    ServiceError(String),
    #[error("malformed service response: {0}")]
    MalformedResponse(String),
    #[error("report is empty")]
    EmptyReport,
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),
    #[error("session {0} is not completed")]
    SessionIncomplete(Uuid),
    #[error("invalid transition from {0} to {1}")]
    InvalidTransition(String, String),
    #[error("answer cannot be empty")]
    EmptyAnswer,
    #[error("answer exceeds maximum length of {0} characters")]
    AnswerTooLong(usize),
    #[error("not awaiting an answer (phase: {0})")]
    NotAwaitingAnswer(Phase),
    #[error("a previous write has not been persisted; retry first")]
    SyncPending,
    #[error("ledger for session {session_id} would shrink from {stored} to {attempted} pairs")]
    LedgerRegression {
        session_id: Uuid,
        stored: usize,
        attempted: usize,
    },
    #[error("ledger for session {session_id} would grow from {stored} to {attempted} pairs in one write")]
    LedgerGap {
        session_id: Uuid,
        stored: usize,
        attempted: usize,
    },
    #[error("ledger for session {session_id} differs from the stored one at pair {position}")]
    LedgerDiverged { session_id: Uuid, position: usize },
    #[error("session {session_id} is {status}; its ledger is closed")]
    SessionClosed {
        session_id: Uuid,
        status: SessionStatus,
    },
    #[error("ledger for session {session_id} has {len} of {required} pairs")]
    LedgerIncomplete {
        session_id: Uuid,
        len: usize,
        required: usize,
    },
}

impl From<NetGuideError> for AssessmentError {
    fn from(err: NetGuideError) -> Self {
        AssessmentError::StoreUnavailable(err.to_string())
    }
}

impl AssessmentError {
    /// Whether re-running the same write can succeed. Everything else
    /// reflects stored state that a retry would hit again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AssessmentError::StoreUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assessment_error_display() {
        let err = AssessmentError::EmptyAnswer;
        assert_eq!(err.to_string(), "answer cannot be empty");

        let err = AssessmentError::AnswerTooLong(2000);
        assert_eq!(
            err.to_string(),
            "answer exceeds maximum length of 2000 characters"
        );

        let err = AssessmentError::NotAwaitingAnswer(Phase::Evaluating);
        assert_eq!(err.to_string(), "not awaiting an answer (phase: evaluating)");

        let err = AssessmentError::ServiceError("workflow failed".to_string());
        assert_eq!(err.to_string(), "reasoning service error: workflow failed");

        let err = AssessmentError::EmptyReport;
        assert_eq!(err.to_string(), "report is empty");
    }

    #[test]
    fn test_ledger_errors_carry_counts() {
        let id = Uuid::nil();
        let err = AssessmentError::LedgerRegression {
            session_id: id,
            stored: 3,
            attempted: 2,
        };
        assert!(err.to_string().contains("from 3 to 2"));

        let err = AssessmentError::LedgerIncomplete {
            session_id: id,
            len: 4,
            required: 5,
        };
        assert!(err.to_string().contains("4 of 5"));
    }

    #[test]
    fn test_from_netguide_error_is_store_unavailable() {
        let err: AssessmentError = NetGuideError::Storage("connection lost".to_string()).into();
        assert!(matches!(err, AssessmentError::StoreUnavailable(_)));
        assert!(err.to_string().contains("connection lost"));
    }

    #[test]
    fn test_only_store_outages_are_retryable() {
        let id = Uuid::nil();
        assert!(AssessmentError::StoreUnavailable("x".into()).is_retryable());
        assert!(!AssessmentError::SessionClosed {
            session_id: id,
            status: SessionStatus::Abandoned,
        }
        .is_retryable());
        assert!(!AssessmentError::InvalidTransition("abandoned".into(), "completed".into())
            .is_retryable());
        assert!(!AssessmentError::LedgerDiverged {
            session_id: id,
            position: 0,
        }
        .is_retryable());
        assert!(!AssessmentError::ServiceUnreachable("timeout".into()).is_retryable());
    }

    #[test]
    fn test_session_closed_names_status() {
        let err = AssessmentError::SessionClosed {
            session_id: Uuid::nil(),
            status: SessionStatus::Completed,
        };
        assert!(err.to_string().ends_with("is completed; its ledger is closed"));
    }
}
