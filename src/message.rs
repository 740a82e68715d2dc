//! Semantic message types for conversation history.
//!
//! The conversation stores role-tagged text only. Wire formats are produced by
//! the provider clients on every request, so a history can be replayed against
//! any configured model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Result of executing a directive, fed back to the model
    Observation,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Observation => "observation",
        }
    }
}

/// A single immutable message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Profile id of the model that authored an assistant message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>, model_id: Option<String>) -> Self {
        Self {
            role,
            content: content.into(),
            model_id,
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content, None)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, None)
    }

    pub fn assistant(content: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, Some(model_id.into()))
    }

    pub fn observation(content: impl Into<String>) -> Self {
        Self::new(Role::Observation, content, None)
    }

    /// Copy of this message with different content, keeping role and provenance
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            role: self.role,
            content: content.into(),
            model_id: self.model_id.clone(),
            created_at: self.created_at,
        }
    }
}

/// Conversation state for one session: the unit of persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: String,
    messages: Vec<Message>,
    /// `None` means "use the default profile"
    #[serde(default)]
    pub active_model_id: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            active_model_id: None,
            updated_at: Some(Utc::now()),
        }
    }

    /// Append a message. History is append-only and never reordered.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Some(Utc::now());
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Most recent assistant message, if any
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_conversation() {
        let mut state = ConversationState::new("test-session");

        state.push(Message::user("Hello"));
        state.push(Message::assistant("Hi there!", "r1"));
        state.push(Message::user("Bye"));

        assert_eq!(state.len(), 3);
        assert_eq!(state.messages()[0].role, Role::User);
        assert_eq!(state.last_assistant().unwrap().content, "Hi there!");
        assert_eq!(state.last_assistant().unwrap().model_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_state_serde() {
        let mut state = ConversationState::new("abc");
        state.active_model_id = Some("coder".to_string());
        state.push(Message::user("List files"));
        state.push(Message::observation("Execution result: a.txt"));

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"observation\""));

        let loaded: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.active_model_id.as_deref(), Some("coder"));
        assert_eq!(loaded.messages()[1].role, Role::Observation);
    }

    #[test]
    fn test_with_content_keeps_provenance() {
        let msg = Message::assistant("<think>x</think>answer", "r1");
        let stripped = msg.with_content("answer");
        assert_eq!(stripped.role, Role::Assistant);
        assert_eq!(stripped.model_id.as_deref(), Some("r1"));
        assert_eq!(stripped.created_at, msg.created_at);
    }
}
