// Public modules
pub mod knowledge_base;
pub mod message;
pub mod model;
pub mod provider;
pub mod session;
pub mod stream_event;

// Re-exports
pub use knowledge_base::{Document, KnowledgeBase, TEXT_EXTENSIONS};
pub use message::{Message, Role, WireMessage};
pub use model::{Model, ModelsEntry, ModelsResponse, TagsModel, TagsModelDetails, TagsResponse};
pub use provider::{DEFAULT_PROVIDER_ID, DEFAULT_PROVIDER_URL, Provider, ProviderKind};
pub use session::{ChatSession, TITLE_CHARS, title_from};
pub use stream_event::StreamEvent;
