use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Role of a message author.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model.
    System,

    /// The person chatting.
    User,

    /// The model.
    Assistant,
}

impl Role {
    /// The lowercase wire name of this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message persisted in a chat session.
///
/// Messages are immutable once finalized.  The one exception is the assistant
/// message of an active send, whose content grows as deltas arrive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: String,

    /// Author of the message.
    pub role: Role,

    /// Text of the message.
    pub content: String,

    /// When the message was created.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    /// Names of the documents the answer drew on, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
}

impl Message {
    /// Create a new message with a fresh id and the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: OffsetDateTime::now_utc(),
            sources: None,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an empty assistant message to stream into.
    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, String::new())
    }

    /// Strip this message down to what a backend sees.
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// The `{role, content}` pair sent to backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Author of the message.
    pub role: Role,

    /// Text of the message.
    pub content: String,
}

impl WireMessage {
    /// Create a wire message.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system wire message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user wire message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant wire message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn message_serialization() {
        let message = Message {
            id: "m1".to_string(),
            role: Role::Assistant,
            content: "hello".to_string(),
            timestamp: datetime!(2025-02-19 0:00:00 UTC),
            sources: None,
        };

        let json = serde_json::to_value(&message).unwrap();
        let expected = serde_json::json!({
            "id": "m1",
            "role": "assistant",
            "content": "hello",
            "timestamp": "2025-02-19T00:00:00Z"
        });
        assert_eq!(json, expected);
    }

    #[test]
    fn message_with_sources_deserialization() {
        let json = serde_json::json!({
            "id": "m2",
            "role": "assistant",
            "content": "see the manual",
            "timestamp": "2025-02-19T00:00:00Z",
            "sources": ["manual.txt"]
        });
        let message: Message = serde_json::from_value(json).unwrap();
        assert_eq!(message.sources, Some(vec!["manual.txt".to_string()]));
        assert_eq!(message.role, Role::Assistant);
    }

    #[test]
    fn wire_message_shape() {
        let wire = Message::user("hi").to_wire();
        assert_eq!(
            serde_json::to_value(&wire).unwrap(),
            serde_json::json!({"role": "user", "content": "hi"})
        );
    }

    #[test]
    fn placeholder_is_empty_assistant() {
        let placeholder = Message::assistant_placeholder();
        assert_eq!(placeholder.role, Role::Assistant);
        assert!(placeholder.content.is_empty());
        assert!(!placeholder.id.is_empty());
    }
}
