//! Conversation domain types.
//!
//! The conversation context is the scheduler's in-memory record of prior
//! chat turns: User asks → model replies → both are appended. Background
//! jobs (summaries, names, tags) never touch it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (identity, rules)
    System,
    /// The end user
    User,
    /// The local model
    Assistant,
}

impl Role {
    /// The header name used in the model's turn format.
    pub fn header(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Ordered sequence of chat turns, owned exclusively by the scheduler.
///
/// Mutated only after a chat job completes successfully (the prompt+reply
/// pair is appended) and replaced wholesale on context reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Ordered messages
    pub messages: Vec<ChatMessage>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self { messages: Vec::new() }
    }

    /// Append a completed user→assistant exchange.
    pub fn push_turn(&mut self, user_content: impl Into<String>, reply: impl Into<String>) {
        self.messages.push(ChatMessage::user(user_content));
        self.messages.push(ChatMessage::assistant(reply));
    }

    /// Replace the context wholesale.
    pub fn reset(&mut self) {
        self.messages.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_turn_appends_pair() {
        let mut ctx = ConversationContext::new();
        ctx.push_turn("What is a vault?", "A place to keep documents.");
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.messages[0].role, Role::User);
        assert_eq!(ctx.messages[1].role, Role::Assistant);
    }

    #[test]
    fn reset_clears_everything() {
        let mut ctx = ConversationContext::new();
        ctx.push_turn("a", "b");
        ctx.reset();
        assert!(ctx.is_empty());
    }

    #[test]
    fn role_headers() {
        assert_eq!(Role::System.header(), "system");
        assert_eq!(Role::User.header(), "user");
        assert_eq!(Role::Assistant.header(), "assistant");
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = ChatMessage::user("Test message");
        let json = serde_json::to_string(&msg).unwrap();
        let deserialized: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.content, "Test message");
        assert_eq!(deserialized.role, Role::User);
    }
}
