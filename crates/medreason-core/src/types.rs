//! Conversation and answer types.

use serde::{Deserialize, Serialize};

use crate::config::constants::DEFAULT_SYSTEM_PROMPT;

/// A single chat turn, in the shape chat templates expect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// "system", "developer", "user" or "assistant".
    pub role: String,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// Two-turn conversation built for each request and discarded after generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRequest {
    /// Fixed system instruction.
    pub system_prompt: String,
    /// Caller-supplied message.
    pub user_message: String,
}

impl ConversationRequest {
    pub fn new(system_prompt: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_message: user_message.into(),
        }
    }

    /// Conversation with the default medical system instruction.
    pub fn with_default_system(user_message: impl Into<String>) -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT, user_message)
    }

    /// System turn followed by the user turn.
    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(self.user_message.clone()),
        ]
    }
}

/// Sections extracted from a channel-tagged generation.
///
/// A result is only meaningful when `final_answer` is present; `reasoning`
/// alone is not rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAnswer {
    /// Reasoning-channel text, trimmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Final-channel text, trimmed.
    #[serde(rename = "final", skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
}

impl ParsedAnswer {
    /// Whether the final section was found.
    pub fn is_structured(&self) -> bool {
        self.final_answer.is_some()
    }

    /// Caller-facing text, or `None` when the final section is missing.
    pub fn render(&self) -> Option<String> {
        match (&self.reasoning, &self.final_answer) {
            (Some(reasoning), Some(answer)) => {
                Some(format!("Thinking:\n{}\n\nFinal:\n{}", reasoning, answer))
            }
            (None, Some(answer)) => Some(format!("Final:\n{}", answer)),
            (_, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_messages_order() {
        let request = ConversationRequest::with_default_system("What are symptoms of flu?");
        let messages = request.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, "You are a medical reasoning assistant");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "What are symptoms of flu?");
    }

    #[test]
    fn test_render_both_sections() {
        let answer = ParsedAnswer {
            reasoning: Some("chain of thought".into()),
            final_answer: Some("the diagnosis is X".into()),
        };
        assert_eq!(
            answer.render().as_deref(),
            Some("Thinking:\nchain of thought\n\nFinal:\nthe diagnosis is X")
        );
    }

    #[test]
    fn test_render_reasoning_without_final() {
        let answer = ParsedAnswer {
            reasoning: Some("orphaned".into()),
            final_answer: None,
        };
        assert!(!answer.is_structured());
        assert_eq!(answer.render(), None);
    }
}
