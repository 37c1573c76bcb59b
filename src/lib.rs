// Public modules
pub mod adapter;
pub mod augmenter;
pub mod chat;
pub mod client;
pub mod decoder;
pub mod error;
pub mod observability;
pub mod orchestrator;
pub mod retrieval;
pub mod store;
pub mod types;

// Re-exports
pub use adapter::{RequestDescriptor, StreamRequest};
pub use augmenter::RetrievedContext;
pub use client::{ByteStream, ClientOptions, HttpClient, Transport};
pub use decoder::{FrameDecoder, StreamMode, decode_stream};
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use orchestrator::{
    CompletionReason, NoopObserver, Orchestrator, OrchestratorSettings, PendingSend,
    SendObserver, SendOutcome, SendRequest, SendState, SendStatus,
};
pub use retrieval::{RagAnswer, RagDocument, RetrievalClient};
pub use store::{JsonFile, KnowledgeBaseStore, SessionStore};
pub use types::*;
