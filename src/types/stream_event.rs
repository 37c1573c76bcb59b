/// A decoded event from a chat response stream.
///
/// Both wire formats decode into this one type, so nothing downstream of the
/// decoder needs to know which backend produced a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A fragment of generated text.
    Content(String),

    /// The backend finished the answer.  Nothing follows this event.
    Done,

    /// Documents the backend retrieved for this answer.
    Sources(Vec<String>),

    /// The backend reported a failure in-band.
    Error(String),
}

impl StreamEvent {
    /// Returns true if this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done)
    }

    /// The text fragment carried by a content event.
    pub fn as_content(&self) -> Option<&str> {
        match self {
            StreamEvent::Content(text) => Some(text),
            _ => None,
        }
    }
}
