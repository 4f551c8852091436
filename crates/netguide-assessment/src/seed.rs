//! Chat seed transform: flattens the free-form chat that preceded the
//! assessment into the plain-text `chat` field sent with every turn.

use netguide_core::types::{ChatMessage, ChatRole};

/// Join non-system messages as `User: ...` / `Assistant: ...` lines.
pub fn chat_transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter_map(|msg| match msg.role {
            ChatRole::User => Some(format!("User: {}", msg.content)),
            ChatRole::Assistant => Some(format!("Assistant: {}", msg.content)),
            ChatRole::System => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_chat() {
        assert_eq!(chat_transcript(&[]), "");
    }

    #[test]
    fn test_roles_are_labelled_and_system_dropped() {
        let messages = vec![
            ChatMessage::new(ChatRole::System, "You are a helpful guide."),
            ChatMessage::new(ChatRole::Assistant, "Hi! What brings you here?"),
            ChatMessage::new(ChatRole::User, "My son struggles with reading."),
        ];
        assert_eq!(
            chat_transcript(&messages),
            "Assistant: Hi! What brings you here?\nUser: My son struggles with reading."
        );
    }

    #[test]
    fn test_only_system_messages() {
        let messages = vec![ChatMessage::new(ChatRole::System, "prompt")];
        assert_eq!(chat_transcript(&messages), "");
    }

    #[test]
    fn test_multiline_content_is_kept() {
        let messages = vec![ChatMessage::new(ChatRole::User, "line one\nline two")];
        assert_eq!(chat_transcript(&messages), "User: line one\nline two");
    }
}
