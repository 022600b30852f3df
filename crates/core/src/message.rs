//! Message and Conversation domain types.
//!
//! A conversation thread is an ordered list of messages plus a title; the
//! gateway keeps one per thread id and hands the history to agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions (persona, stage prompt)
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Optional metadata (agent name, cited sources, …)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }
}

/// A conversation is an ordered sequence of messages with shared context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique thread ID
    pub id: ThreadId,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,

    /// Optional title (taken from the first user message)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Maximum characters of the first utterance used as a thread title.
const TITLE_CHARS: usize = 60;

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        Self::with_id(ThreadId::new())
    }

    /// Create a new empty conversation with a caller-chosen id.
    pub fn with_id(id: ThreadId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            title: None,
        }
    }

    /// Add a message to the conversation.
    ///
    /// The first user message also becomes the title.
    pub fn push(&mut self, message: Message) {
        if self.title.is_none() && message.role == Role::User {
            let title: String = message.content.trim().chars().take(TITLE_CHARS).collect();
            if !title.is_empty() {
                self.title = Some(title);
            }
        }
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// The most recent `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hola");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hola");
    }

    #[test]
    fn conversation_tracks_updates() {
        let mut conv = Conversation::new();
        let created = conv.created_at;

        conv.push(Message::user("First message"));
        assert_eq!(conv.messages.len(), 1);
        assert!(conv.updated_at >= created);
    }

    #[test]
    fn first_user_message_becomes_title() {
        let mut conv = Conversation::new();
        conv.push(Message::system("persona"));
        assert!(conv.title.is_none());

        conv.push(Message::user("¿Cómo funciona el depósito en garantía?"));
        conv.push(Message::user("otra cosa"));
        assert_eq!(
            conv.title.as_deref(),
            Some("¿Cómo funciona el depósito en garantía?")
        );
    }

    #[test]
    fn title_is_truncated_on_char_boundary() {
        let mut conv = Conversation::new();
        conv.push(Message::user("ñ".repeat(100)));
        assert_eq!(conv.title.unwrap().chars().count(), 60);
    }

    #[test]
    fn recent_returns_tail() {
        let mut conv = Conversation::new();
        for i in 0..5 {
            conv.push(Message::user(format!("m{i}")));
        }
        let tail = conv.recent(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "m3");
        assert_eq!(conv.recent(10).len(), 5);
    }

    #[test]
    fn role_serializes_lowercase() {
        let msg = Message::assistant("ok");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"assistant""#));
    }
}
