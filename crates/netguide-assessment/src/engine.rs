//! Turn-taking engine: drives question -> answer -> next-question cycles for
//! one session.
//!
//! The engine holds its state behind an async mutex and only ever runs one
//! operation at a time. A `begin` or `submit_answer` that arrives while
//! another operation is in flight is dropped rather than queued.

use std::sync::Arc;

use netguide_core::config::AssessmentConfig;
use netguide_core::types::{ChatMessage, QnaPair, SessionStatus};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AssessmentError;
use crate::extract::{extract_question, CompletionReply};
use crate::seed::chat_transcript;
use crate::service::{ReasoningService, TurnRequest, TurnStatus};
use crate::state_machine::{validate_transition, Phase};
use crate::synchronizer::LedgerSynchronizer;

/// Used when both the service and the positional default would repeat the
/// previous question.
const EXTRA_PROMPTS: &[&str] = &[
    "Is there anything else you would like to share?",
    "Is there anything more you would like to add?",
];

/// Render model of the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnView {
    pub session_id: Uuid,
    pub phase: Phase,
    pub answered: Vec<QnaPair>,
    pub pending_question: Option<String>,
    pub question_count: usize,
    /// A write failed; call [`TurnEngine::retry`] before anything else.
    pub retry_required: bool,
    /// Closing message, once completed.
    pub closing: Option<String>,
    pub analysis: Option<Value>,
}

impl TurnView {
    pub fn answered_count(&self) -> usize {
        self.answered.len()
    }

    /// Fraction of the assessment answered, in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        if self.question_count == 0 {
            return 1.0;
        }
        (self.answered.len() as f32 / self.question_count as f32).min(1.0)
    }

    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }
}

/// Result of an engine operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The operation ran; the view reflects the new state.
    Updated(TurnView),
    /// Another operation was in flight, so this one was dropped.
    Dropped,
}

impl TurnOutcome {
    pub fn view(&self) -> Option<&TurnView> {
        match self {
            TurnOutcome::Updated(view) => Some(view),
            TurnOutcome::Dropped => None,
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, TurnOutcome::Dropped)
    }
}

/// The write that must be re-run by [`TurnEngine::retry`].
#[derive(Debug, Clone)]
enum UnsyncedWrite {
    Ledger,
    Completion(CompletionReply),
}

#[derive(Debug)]
struct EngineState {
    loaded: bool,
    phase: Phase,
    chat: String,
    ledger: Vec<QnaPair>,
    pending: Option<String>,
    analysis: Option<Value>,
    unsynced: Option<UnsyncedWrite>,
}

impl EngineState {
    fn fresh() -> Self {
        Self {
            loaded: false,
            phase: Phase::AwaitingFirstQuestion,
            chat: String::new(),
            ledger: Vec::new(),
            pending: None,
            analysis: None,
            unsynced: None,
        }
    }

    /// Record a failed write. Store outages leave it outstanding for
    /// `retry`; any other refusal means the cached state no longer matches
    /// the store, so it is dropped and the next `begin` reloads.
    fn halt(&mut self, session_id: Uuid, write: UnsyncedWrite, err: &AssessmentError) {
        if err.is_retryable() {
            warn!(session_id = %session_id, error = %err, "Write failed; halting");
            self.unsynced = Some(write);
        } else {
            warn!(session_id = %session_id, error = %err, "Write refused; discarding cached state");
            *self = Self::fresh();
        }
    }

    fn transition(&mut self, to: Phase) -> Result<(), AssessmentError> {
        validate_transition(self.phase, to)?;
        debug!(from = %self.phase, to = %to, "Phase transition");
        self.phase = to;
        Ok(())
    }
}

pub struct TurnEngine {
    session_id: Uuid,
    synchronizer: Arc<LedgerSynchronizer>,
    service: Arc<dyn ReasoningService>,
    config: AssessmentConfig,
    state: Mutex<EngineState>,
}

impl TurnEngine {
    pub fn new(
        session_id: Uuid,
        synchronizer: Arc<LedgerSynchronizer>,
        service: Arc<dyn ReasoningService>,
        config: AssessmentConfig,
    ) -> Self {
        Self {
            session_id,
            synchronizer,
            service,
            config,
            state: Mutex::new(EngineState::fresh()),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn question_count(&self) -> usize {
        self.synchronizer.question_count()
    }

    /// Start or resume the session.
    ///
    /// A fresh session stores `seed` as its chat and asks for the first
    /// question. A resumed session rebuilds its ledger from the store and
    /// asks for the next question only if none is pending. Calling `begin`
    /// again while a question is pending makes no service call.
    pub async fn begin(&self, seed: &[ChatMessage]) -> Result<TurnOutcome, AssessmentError> {
        let Ok(mut state) = self.state.try_lock() else {
            debug!(session_id = %self.session_id, "begin dropped: operation in flight");
            return Ok(TurnOutcome::Dropped);
        };

        if !state.loaded {
            self.load(&mut state, seed).await?;
        }

        if state.phase == Phase::Completed
            || state.pending.is_some()
            || state.unsynced.is_some()
        {
            return Ok(TurnOutcome::Updated(self.render(&state)));
        }

        if state.ledger.len() >= self.question_count() {
            // Crash between the last append and completion.
            info!(session_id = %self.session_id, "Resuming interrupted completion");
            state.transition(Phase::Evaluating)?;
            self.complete(&mut state).await?;
        } else {
            self.request_next_question(&mut state).await?;
        }
        Ok(TurnOutcome::Updated(self.render(&state)))
    }

    /// Answer the pending question.
    pub async fn submit_answer(&self, text: &str) -> Result<TurnOutcome, AssessmentError> {
        let Ok(mut state) = self.state.try_lock() else {
            debug!(session_id = %self.session_id, "Submission dropped: operation in flight");
            return Ok(TurnOutcome::Dropped);
        };

        if state.unsynced.is_some() {
            return Err(AssessmentError::SyncPending);
        }
        if state.phase != Phase::AwaitingAnswer || state.pending.is_none() {
            return Err(AssessmentError::NotAwaitingAnswer(state.phase));
        }

        let answer = text.trim();
        if answer.is_empty() {
            return Err(AssessmentError::EmptyAnswer);
        }
        if answer.chars().count() > self.config.max_answer_length {
            return Err(AssessmentError::AnswerTooLong(self.config.max_answer_length));
        }

        state.transition(Phase::Evaluating)?;
        let question = state.pending.take().unwrap_or_default();
        state.ledger.push(QnaPair::new(question, answer));
        debug!(
            session_id = %self.session_id,
            answered = state.ledger.len(),
            "Answer accepted"
        );

        self.persist_ledger(&mut state).await?;
        self.advance(&mut state).await?;
        Ok(TurnOutcome::Updated(self.render(&state)))
    }

    /// Re-run the write that failed last, then continue where the engine
    /// stopped. Does nothing when no write is outstanding.
    pub async fn retry(&self) -> Result<TurnOutcome, AssessmentError> {
        let Ok(mut state) = self.state.try_lock() else {
            return Ok(TurnOutcome::Dropped);
        };

        match state.unsynced.take() {
            None => {}
            Some(UnsyncedWrite::Ledger) => {
                info!(session_id = %self.session_id, "Retrying ledger write");
                self.persist_ledger(&mut state).await?;
                self.advance(&mut state).await?;
            }
            Some(UnsyncedWrite::Completion(verdict)) => {
                info!(session_id = %self.session_id, "Retrying completion write");
                self.persist_completion(&mut state, verdict).await?;
            }
        }
        Ok(TurnOutcome::Updated(self.render(&state)))
    }

    /// Current render model. Waits for an in-flight operation to finish.
    pub async fn view(&self) -> TurnView {
        let state = self.state.lock().await;
        self.render(&state)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn load(
        &self,
        state: &mut EngineState,
        seed: &[ChatMessage],
    ) -> Result<(), AssessmentError> {
        let snapshot = self.synchronizer.load(self.session_id).await?;

        if snapshot.session.status == SessionStatus::Abandoned {
            return Err(AssessmentError::InvalidTransition(
                snapshot.session.status.to_string(),
                Phase::AwaitingAnswer.to_string(),
            ));
        }

        let transcript = match snapshot.transcript {
            Some(transcript) => transcript,
            None => {
                self.synchronizer
                    .open_transcript(self.session_id, &chat_transcript(seed))
                    .await?
            }
        };

        state.chat = transcript.chat;
        state.ledger = transcript.qna;
        state.analysis = transcript.analysis;
        if snapshot.session.status == SessionStatus::Completed {
            state.phase = Phase::Completed;
        }
        state.loaded = true;

        info!(
            session_id = %self.session_id,
            answered = state.ledger.len(),
            phase = %state.phase,
            "Session loaded"
        );
        Ok(())
    }

    async fn persist_ledger(&self, state: &mut EngineState) -> Result<(), AssessmentError> {
        if let Err(e) = self
            .synchronizer
            .append_answer(self.session_id, &state.ledger)
            .await
        {
            state.halt(self.session_id, UnsyncedWrite::Ledger, &e);
            return Err(e);
        }
        Ok(())
    }

    /// After a persisted answer: ask for the next question or complete.
    async fn advance(&self, state: &mut EngineState) -> Result<(), AssessmentError> {
        if state.ledger.len() >= self.question_count() {
            self.complete(state).await
        } else {
            self.request_next_question(state).await
        }
    }

    async fn request_next_question(&self, state: &mut EngineState) -> Result<(), AssessmentError> {
        let position = state.ledger.len();
        let request = TurnRequest {
            status: TurnStatus::Ongoing,
            chat: state.chat.clone(),
            assessment: state.ledger.clone(),
        };

        let received = match self.service.next_turn(&request).await {
            Ok(reply) => {
                let question = extract_question(&reply);
                if question.is_none() {
                    warn!(
                        session_id = %self.session_id,
                        position,
                        error = %AssessmentError::MalformedResponse("no question in reply".into()),
                        "Using default prompt"
                    );
                }
                question
            }
            Err(e) => {
                warn!(session_id = %self.session_id, position, error = %e, "Using default prompt");
                None
            }
        };

        if received.is_some() && received == state.pending {
            return Ok(());
        }

        let last_answered = state.ledger.last().map(|pair| pair.question.as_str());
        let question = match received {
            Some(q) if Some(q.as_str()) != last_answered => q,
            Some(_) => {
                debug!(session_id = %self.session_id, position, "Service repeated the previous question");
                self.fallback_question(position, last_answered)
            }
            None => self.fallback_question(position, last_answered),
        };

        state.transition(Phase::AwaitingAnswer)?;
        state.pending = Some(question);
        Ok(())
    }

    fn fallback_question(&self, position: usize, last_answered: Option<&str>) -> String {
        std::iter::once(self.config.default_prompt(position))
            .chain(EXTRA_PROMPTS.iter().map(|p| p.to_string()))
            .find(|q| Some(q.as_str()) != last_answered)
            .unwrap_or_else(|| self.config.default_prompt(position))
    }

    async fn complete(&self, state: &mut EngineState) -> Result<(), AssessmentError> {
        let request = TurnRequest {
            status: TurnStatus::Done,
            chat: state.chat.clone(),
            assessment: state.ledger.clone(),
        };

        let verdict = match self.service.next_turn(&request).await {
            Ok(reply) => CompletionReply::parse(&reply),
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Completion call failed");
                CompletionReply::default()
            }
        };
        if !verdict.is_usable() {
            warn!(
                session_id = %self.session_id,
                complete = verdict.complete,
                has_analysis = verdict.analysis.is_some(),
                "No usable analysis; recording raw ledger as result"
            );
        }

        self.persist_completion(state, verdict).await
    }

    async fn persist_completion(
        &self,
        state: &mut EngineState,
        verdict: CompletionReply,
    ) -> Result<(), AssessmentError> {
        match self.write_completion(state, &verdict).await {
            Ok(analysis) => {
                state.analysis = analysis;
                state.transition(Phase::Completed)?;
                info!(session_id = %self.session_id, answered = state.ledger.len(), "Assessment completed");
                Ok(())
            }
            Err(e) => {
                state.halt(self.session_id, UnsyncedWrite::Completion(verdict), &e);
                Err(e)
            }
        }
    }

    /// Write analysis, result record and status. Each step is idempotent.
    async fn write_completion(
        &self,
        state: &EngineState,
        verdict: &CompletionReply,
    ) -> Result<Option<Value>, AssessmentError> {
        let analysis = match (&verdict.analysis, verdict.is_usable()) {
            (Some(analysis), true) => {
                self.synchronizer
                    .write_analysis(self.session_id, analysis)
                    .await?;
                self.synchronizer
                    .write_result(self.session_id, analysis, verdict.recommendations.as_ref())
                    .await?;
                Some(analysis.clone())
            }
            _ => {
                let fallback = json!({ "chat": state.chat, "qna": state.ledger });
                self.synchronizer
                    .write_result(self.session_id, &fallback, None)
                    .await?;
                None
            }
        };

        self.synchronizer
            .mark_status(self.session_id, SessionStatus::Completed)
            .await?;
        Ok(analysis)
    }

    fn render(&self, state: &EngineState) -> TurnView {
        let completed = state.phase == Phase::Completed;
        TurnView {
            session_id: self.session_id,
            phase: state.phase,
            answered: state.ledger.clone(),
            pending_question: state.pending.clone(),
            question_count: self.question_count(),
            retry_required: state.unsynced.is_some(),
            closing: completed.then(|| self.config.closing_prompt.clone()),
            analysis: state.analysis.clone(),
        }
    }
}
