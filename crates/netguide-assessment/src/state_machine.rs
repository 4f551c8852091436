//! Turn phase state machine with validated transitions.
//!
//! AwaitingFirstQuestion -> AwaitingAnswer -> Evaluating -> AwaitingAnswer
//! (loop) until the last answer, then Evaluating -> Completed.

use std::fmt;

use netguide_core::types::SessionStatus;
use serde::{Deserialize, Serialize};

use crate::error::AssessmentError;

/// Where the turn-taking engine currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// The ledger is open but no question has arrived yet.
    AwaitingFirstQuestion,
    /// A question is pending and the user may answer it.
    AwaitingAnswer,
    /// An answer was accepted and the service is being consulted.
    Evaluating,
    /// The analysis was recorded. Terminal.
    Completed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::AwaitingFirstQuestion => write!(f, "awaiting_first_question"),
            Phase::AwaitingAnswer => write!(f, "awaiting_answer"),
            Phase::Evaluating => write!(f, "evaluating"),
            Phase::Completed => write!(f, "completed"),
        }
    }
}

/// Validate that a phase transition is allowed.
///
/// Valid transitions:
/// - AwaitingFirstQuestion -> AwaitingAnswer
/// - AwaitingFirstQuestion -> Evaluating (resume with a full ledger)
/// - AwaitingAnswer -> Evaluating
/// - Evaluating -> AwaitingAnswer
/// - Evaluating -> Completed
pub fn validate_transition(from: Phase, to: Phase) -> Result<(), AssessmentError> {
    let valid = matches!(
        (from, to),
        (Phase::AwaitingFirstQuestion, Phase::AwaitingAnswer)
            | (Phase::AwaitingFirstQuestion, Phase::Evaluating)
            | (Phase::AwaitingAnswer, Phase::Evaluating)
            | (Phase::Evaluating, Phase::AwaitingAnswer)
            | (Phase::Evaluating, Phase::Completed)
    );

    if valid {
        Ok(())
    } else {
        Err(AssessmentError::InvalidTransition(
            from.to_string(),
            to.to_string(),
        ))
    }
}

/// Validate a persisted session status change.
///
/// Only `in_progress -> completed` and `in_progress -> abandoned` are allowed.
pub fn validate_status_transition(
    from: SessionStatus,
    to: SessionStatus,
) -> Result<(), AssessmentError> {
    let valid = matches!(
        (from, to),
        (SessionStatus::InProgress, SessionStatus::Completed)
            | (SessionStatus::InProgress, SessionStatus::Abandoned)
    );

    if valid {
        Ok(())
    } else {
        Err(AssessmentError::InvalidTransition(
            from.to_string(),
            to.to_string(),
        ))
    }
}
