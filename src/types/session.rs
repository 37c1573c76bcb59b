use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{Message, Role, WireMessage};

/// Maximum number of characters taken from the first user message for a title.
pub const TITLE_CHARS: usize = 30;

/// A persisted multi-turn conversation.
///
/// `messages` is kept in send order.  A session only references its knowledge base;
/// the reference may dangle after the knowledge base is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    /// Unique session identifier.
    pub id: String,

    /// Display title.
    pub title: String,

    /// Messages in chronological send order.
    pub messages: Vec<Message>,

    /// Model used for this conversation.
    pub model_id: String,

    /// Provider serving the model.
    pub provider_id: String,

    /// Knowledge base consulted for context, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base_id: Option<String>,

    /// When the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the session last changed.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ChatSession {
    /// Create an empty session titled after the text that started it.
    pub fn new(
        first_message: &str,
        model_id: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title_from(first_message),
            messages: Vec::new(),
            model_id: model_id.into(),
            provider_id: provider_id.into(),
            knowledge_base_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a knowledge base reference.
    pub fn with_knowledge_base(mut self, knowledge_base_id: Option<String>) -> Self {
        self.knowledge_base_id = knowledge_base_id;
        self
    }

    /// Look up a message by id.
    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    /// Look up a message by id for mutation.
    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    /// The conversation as sent to a backend, excluding the given message.
    ///
    /// Empty assistant messages (placeholders of failed sends) are left out.
    pub fn history_excluding(&self, message_id: &str) -> Vec<WireMessage> {
        self.messages
            .iter()
            .filter(|m| m.id != message_id)
            .filter(|m| !(m.role == Role::Assistant && m.content.is_empty()))
            .map(Message::to_wire)
            .collect()
    }

    /// Mark the session as modified now.
    pub fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }
}

/// The first [`TITLE_CHARS`] characters of `text`.
pub fn title_from(text: &str) -> String {
    text.chars().take(TITLE_CHARS).collect()
}
