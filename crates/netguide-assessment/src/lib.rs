//! NET Guide assessment crate - session resolution, turn-taking, ledger
//! synchronization and report materialization.
//!
//! Provides:
//! - One active session per owner via [`SessionResolver`]
//! - The question/answer loop driven by [`TurnEngine`]
//! - The intake chat that seeds an assessment, via [`IntakeChat`]
//! - Idempotent ledger writes through [`LedgerSynchronizer`]
//! - Sanitized report markup from [`ReportMaterializer`]
//! - An HTTP [`WorkflowClient`] for the reasoning service

pub mod engine;
pub mod error;
pub mod extract;
pub mod intake;
pub mod report;
pub mod resolver;
pub mod seed;
pub mod service;
pub mod state_machine;
pub mod synchronizer;

pub use engine::{TurnEngine, TurnOutcome, TurnView};
pub use error::AssessmentError;
pub use extract::{extract_question, CompletionReply};
pub use intake::IntakeChat;
pub use report::{sanitize_report, ReportMaterializer, SanitizedMarkup};
pub use resolver::SessionResolver;
pub use seed::chat_transcript;
pub use service::{
    chat_reply_text, IntakeService, ReasoningService, TurnRequest, TurnStatus, WorkflowClient,
};
pub use state_machine::Phase;
pub use synchronizer::{LedgerSnapshot, LedgerSynchronizer};
