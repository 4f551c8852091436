//! Intake chat: the free-form conversation that precedes an assessment.
//!
//! The whole conversation is re-sent on every turn. A failed turn leaves the
//! conversation as it was so the user can send the message again. When the
//! user moves on, the messages become the seed of the session's chat.

use std::sync::Arc;

use netguide_core::types::{ChatMessage, ChatRole};
use tracing::{debug, warn};

use crate::error::AssessmentError;
use crate::service::IntakeService;

/// Opening system message of every intake conversation.
pub const INTAKE_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub struct IntakeChat {
    service: Arc<dyn IntakeService>,
    role: Option<String>,
    messages: Vec<ChatMessage>,
}

impl IntakeChat {
    pub fn new(service: Arc<dyn IntakeService>, role: Option<String>) -> Self {
        Self {
            service,
            role,
            messages: vec![ChatMessage::new(ChatRole::System, INTAKE_SYSTEM_PROMPT)],
        }
    }

    /// Ask for the assistant's greeting.
    pub async fn open(&mut self) -> Result<&str, AssessmentError> {
        self.exchange().await?;
        Ok(self.last_reply())
    }

    /// Send one user message and return the assistant's reply.
    pub async fn send(&mut self, text: &str) -> Result<&str, AssessmentError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AssessmentError::EmptyAnswer);
        }
        self.messages.push(ChatMessage::new(ChatRole::User, text));
        if let Err(e) = self.exchange().await {
            self.messages.pop();
            return Err(e);
        }
        Ok(self.last_reply())
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of messages the user has sent.
    pub fn user_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == ChatRole::User)
            .count()
    }

    /// Conversation to seed the assessment with.
    pub fn into_seed(self) -> Vec<ChatMessage> {
        self.messages
    }

    async fn exchange(&mut self) -> Result<(), AssessmentError> {
        let reply = match self
            .service
            .chat(&self.messages, self.role.as_deref())
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, turns = self.user_turns(), "Intake chat turn failed");
                return Err(e);
            }
        };
        debug!(turns = self.user_turns(), "Intake chat reply received");
        self.messages.push(ChatMessage::new(ChatRole::Assistant, reply));
        Ok(())
    }

    fn last_reply(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}
