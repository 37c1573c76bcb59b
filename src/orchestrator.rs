//! The per-send lifecycle of a chat turn.
//!
//! A send moves `Idle → Sending → Streaming → {Completed | Failed}`.  [`Orchestrator::begin`]
//! performs every check that can fail without the network and leaves the session with
//! the user's message and an empty assistant message.  [`Orchestrator::run`] then
//! streams the answer into that assistant message and always resolves to a
//! [`SendOutcome`].
//!
//! The orchestrator is the only writer of session state.  Store locks are taken for the
//! duration of a single mutation and never held across an await, so a UI may read
//! snapshots at any time.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::adapter::{
    StreamRequest, build_chat_request, build_retrieval_chat_request, retrieval_health_url,
    validate_provider,
};
use crate::augmenter::{augment_history, compose_system_prompt, select_context};
use crate::client::Transport;
use crate::decoder::decode_stream;
use crate::error::{Error, Result};
use crate::observability::{
    RETRIEVAL_FALLBACKS, SEND_CANCELLED, SEND_COMPLETED, SEND_DURATION, SEND_FAILED,
    SEND_REJECTED, SEND_STARTED, STREAM_DISCARDED_EVENTS, STREAM_TTFB,
};
use crate::store::{JsonFile, KnowledgeBaseStore, SessionStore};
use crate::types::{ChatSession, Document, KnowledgeBase, Message, Provider, StreamEvent};

////////////////////////////////////////////// States /////////////////////////////////////////////

/// Where a send is in its lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SendState {
    /// No send is active.
    Idle,
    /// Placeholder created, request not yet answered.
    Sending,
    /// Response body is being applied.
    Streaming,
    /// The send ended normally.
    Completed,
    /// The send ended with an error.
    Failed,
}

/// Why a send completed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompletionReason {
    /// The backend signalled the end of the answer.
    Done,
    /// The response body ended without an end signal.
    TransportClosed,
    /// The send was cancelled.
    Cancelled,
    /// The session was deleted while the answer streamed.
    SessionDeleted,
}

/// Terminal status of a send.
#[derive(Debug, Clone)]
pub enum SendStatus {
    Completed(CompletionReason),
    Failed(Error),
}

/// How a send ended.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// Session the send belonged to.
    pub session_id: String,
    /// The assistant message the answer was written into.
    pub message_id: String,
    /// Terminal status.
    pub status: SendStatus,
}

impl SendOutcome {
    /// Returns true if the send completed, for whatever reason.
    pub fn is_completed(&self) -> bool {
        matches!(self.status, SendStatus::Completed(_))
    }

    /// The completion reason, if the send completed.
    pub fn reason(&self) -> Option<CompletionReason> {
        match self.status {
            SendStatus::Completed(reason) => Some(reason),
            SendStatus::Failed(_) => None,
        }
    }

    /// The error, if the send failed.
    pub fn error(&self) -> Option<&Error> {
        match &self.status {
            SendStatus::Completed(_) => None,
            SendStatus::Failed(err) => Some(err),
        }
    }

    /// The state the send ended in.
    pub fn state(&self) -> SendState {
        match self.status {
            SendStatus::Completed(_) => SendState::Completed,
            SendStatus::Failed(_) => SendState::Failed,
        }
    }
}

///////////////////////////////////////////// Observer ////////////////////////////////////////////

/// Receives progress of a send as it happens.
///
/// Callbacks run on the sending task with no store lock held.
pub trait SendObserver: Send {
    /// The send entered `state`.
    fn on_state(&mut self, _state: SendState) {}

    /// A delta arrived; `content` is the whole answer so far.
    fn on_delta(&mut self, _delta: &str, _content: &str) {}

    /// Sources were recorded for the answer.
    fn on_sources(&mut self, _sources: &[String]) {}

    /// The send failed.
    fn on_failed(&mut self, _error: &Error) {}
}

/// An observer that ignores everything.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl SendObserver for NoopObserver {}

////////////////////////////////////////////// Request ////////////////////////////////////////////

/// A user submission.
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Target session.  A new session is created when absent.
    pub session_id: Option<String>,
    /// What the user typed.
    pub text: String,
    /// Model to answer with.
    pub model_id: String,
    /// Provider serving the model.
    pub provider_id: String,
    /// Knowledge base to attach to the session.
    pub knowledge_base_id: Option<String>,
}

impl SendRequest {
    /// A submission that starts a new session.
    pub fn new(
        text: impl Into<String>,
        model_id: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: None,
            text: text.into(),
            model_id: model_id.into(),
            provider_id: provider_id.into(),
            knowledge_base_id: None,
        }
    }

    /// Continue an existing session.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach a knowledge base to the session.
    pub fn with_knowledge_base(mut self, knowledge_base_id: impl Into<String>) -> Self {
        self.knowledge_base_id = Some(knowledge_base_id.into());
        self
    }
}

/// A send that has begun and not yet run.
#[derive(Debug)]
pub struct PendingSend {
    session_id: String,
    message_id: String,
    query: String,
    model_id: String,
    provider: Provider,
    token: CancellationToken,
}

impl PendingSend {
    /// Session the send belongs to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The pre-allocated assistant message.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// A token that cancels this send when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Settings that shape every send.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    /// Base system prompt.
    pub system_prompt: Option<String>,
    /// Root URL of the retrieval backend.
    pub retrieval_url: Option<String>,
    /// Longest wait between two stream events.
    pub stream_idle_timeout: Option<Duration>,
}

enum Route {
    Direct,
    Retrieval {
        backend_url: String,
        knowledge_base_id: String,
    },
}

/////////////////////////////////////////// Orchestrator //////////////////////////////////////////

/// Owner of conversation state and driver of sends.
///
/// Cloning yields another handle onto the same state.
pub struct Orchestrator<T: Transport> {
    transport: Arc<T>,
    providers: Arc<Vec<Provider>>,
    sessions: Arc<Mutex<SessionStore>>,
    knowledge_bases: Arc<Mutex<KnowledgeBaseStore>>,
    settings: Arc<Mutex<OrchestratorSettings>>,
    in_flight: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl<T: Transport> Clone for Orchestrator<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            providers: Arc::clone(&self.providers),
            sessions: Arc::clone(&self.sessions),
            knowledge_bases: Arc::clone(&self.knowledge_bases),
            settings: Arc::clone(&self.settings),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T: Transport> fmt::Debug for Orchestrator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("providers", &self.providers)
            .field("sessions", &lock(&self.sessions).len())
            .field("in_flight", &lock(&self.in_flight).len())
            .finish()
    }
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport> Orchestrator<T> {
    /// Create an orchestrator with empty stores.
    pub fn new(transport: T, providers: Vec<Provider>) -> Self {
        Self {
            transport: Arc::new(transport),
            providers: Arc::new(providers),
            sessions: Arc::new(Mutex::new(SessionStore::new())),
            knowledge_bases: Arc::new(Mutex::new(KnowledgeBaseStore::new())),
            settings: Arc::new(Mutex::new(OrchestratorSettings::default())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start from previously persisted sessions.
    pub fn with_sessions(self, sessions: SessionStore) -> Self {
        *lock(&self.sessions) = sessions;
        self
    }

    /// Start from previously persisted knowledge bases.
    pub fn with_knowledge_bases(self, knowledge_bases: KnowledgeBaseStore) -> Self {
        *lock(&self.knowledge_bases) = knowledge_bases;
        self
    }

    /// Replace the send settings.
    pub fn with_settings(self, settings: OrchestratorSettings) -> Self {
        *lock(&self.settings) = settings;
        self
    }

    /// The transport requests go through.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Configured providers.
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    /// Look up a provider.
    pub fn provider(&self, provider_id: &str) -> Result<&Provider> {
        self.providers
            .iter()
            .find(|p| p.id == provider_id)
            .ok_or_else(|| {
                Error::not_found(
                    format!("no provider named {provider_id}"),
                    Some("provider".to_string()),
                    Some(provider_id.to_string()),
                )
            })
    }

    /// A copy of the current settings.
    pub fn settings(&self) -> OrchestratorSettings {
        lock(&self.settings).clone()
    }

    /// Change the base system prompt for future sends.
    pub fn set_system_prompt(&self, system_prompt: Option<String>) {
        lock(&self.settings).system_prompt = system_prompt;
    }

    /// Snapshot of every session, newest first.
    pub fn sessions(&self) -> Vec<ChatSession> {
        lock(&self.sessions).sessions().to_vec()
    }

    /// Snapshot of one session.
    pub fn session(&self, session_id: &str) -> Option<ChatSession> {
        lock(&self.sessions).get(session_id).cloned()
    }

    /// Snapshot of every knowledge base.
    pub fn knowledge_bases(&self) -> Vec<KnowledgeBase> {
        lock(&self.knowledge_bases).knowledge_bases().to_vec()
    }

    /// Snapshot of one knowledge base.
    pub fn knowledge_base(&self, knowledge_base_id: &str) -> Option<KnowledgeBase> {
        lock(&self.knowledge_bases).get(knowledge_base_id).cloned()
    }

    /// Create an empty knowledge base and return its id.
    pub fn create_knowledge_base(&self, name: &str) -> String {
        lock(&self.knowledge_bases).insert(KnowledgeBase::new(name))
    }

    /// Add a document to a knowledge base.
    pub fn add_document(&self, knowledge_base_id: &str, document: Document) -> Result<()> {
        lock(&self.knowledge_bases).add_document(knowledge_base_id, document)
    }

    /// Remove a document from a knowledge base.  Returns whether it was present.
    pub fn remove_document(&self, knowledge_base_id: &str, document_id: &str) -> Result<bool> {
        lock(&self.knowledge_bases).remove_document(knowledge_base_id, document_id)
    }

    /// Delete a knowledge base.  Sessions referencing it fall back to no context.
    pub fn delete_knowledge_base(&self, knowledge_base_id: &str) -> Option<KnowledgeBase> {
        lock(&self.knowledge_bases).delete(knowledge_base_id)
    }

    /// Point a session at a model.
    pub fn set_session_model(&self, session_id: &str, model_id: &str, provider_id: &str) -> Result<()> {
        self.provider(provider_id)?;
        lock(&self.sessions).set_model(session_id, model_id, provider_id)
    }

    /// Attach a knowledge base to a session, or detach with `None`.
    pub fn set_session_knowledge_base(
        &self,
        session_id: &str,
        knowledge_base_id: Option<String>,
    ) -> Result<()> {
        if let Some(id) = &knowledge_base_id
            && lock(&self.knowledge_bases).get(id).is_none()
        {
            return Err(Error::not_found(
                format!("knowledge base {id} does not exist"),
                Some("knowledge_base".to_string()),
                Some(id.clone()),
            ));
        }
        lock(&self.sessions).set_knowledge_base(session_id, knowledge_base_id)
    }

    /// Returns true if a send is active for the session.
    pub fn is_busy(&self, session_id: &str) -> bool {
        lock(&self.in_flight).contains_key(session_id)
    }

    /// Cancel the active send of a session.  Returns whether one was active.
    pub fn cancel(&self, session_id: &str) -> bool {
        match lock(&self.in_flight).get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Delete a session, abandoning its active send.
    pub fn delete_session(&self, session_id: &str) -> Option<ChatSession> {
        let mut sessions = lock(&self.sessions);
        let removed = sessions.delete(session_id);
        if let Some(token) = lock(&self.in_flight).remove(session_id) {
            token.cancel();
        }
        removed
    }

    /// Write sessions and knowledge bases to their files.
    pub fn save(&self, sessions: &JsonFile, knowledge_bases: &JsonFile) -> Result<()> {
        let snapshot = self.sessions();
        sessions.save(&snapshot)?;
        let snapshot = self.knowledge_bases();
        knowledge_bases.save(&snapshot)
    }

    /// Write both stores into `data_dir`.
    pub fn save_to_dir(&self, data_dir: &Path) -> Result<()> {
        self.save(
            &JsonFile::sessions(data_dir),
            &JsonFile::knowledge_bases(data_dir),
        )
    }

    /// Validate a submission and prepare the session for its answer.
    ///
    /// Nothing is modified when this fails.
    pub fn begin(&self, request: SendRequest) -> Result<PendingSend> {
        if request.text.trim().is_empty() {
            return Err(Error::validation(
                "message must not be empty",
                Some("text".to_string()),
            ));
        }
        let provider = self.provider(&request.provider_id)?.clone();
        validate_provider(&provider)?;
        if request.model_id.trim().is_empty() {
            return Err(Error::configuration(
                "no model selected",
                Some("model".to_string()),
            ));
        }
        if let Some(id) = &request.knowledge_base_id
            && lock(&self.knowledge_bases).get(id).is_none()
        {
            return Err(Error::not_found(
                format!("knowledge base {id} does not exist"),
                Some("knowledge_base".to_string()),
                Some(id.clone()),
            ));
        }

        let mut sessions = lock(&self.sessions);
        let mut in_flight = lock(&self.in_flight);
        let session_id = match request.session_id {
            Some(session_id) => {
                if !sessions.contains(&session_id) {
                    return Err(Error::session_not_found(session_id));
                }
                if in_flight.contains_key(&session_id) {
                    SEND_REJECTED.click();
                    tracing::info!(%session_id, "rejecting send on busy session");
                    return Err(Error::session_busy(session_id));
                }
                sessions.set_model(&session_id, &request.model_id, &provider.id)?;
                if request.knowledge_base_id.is_some() {
                    sessions.set_knowledge_base(&session_id, request.knowledge_base_id)?;
                }
                session_id
            }
            None => {
                let session = ChatSession::new(&request.text, &request.model_id, &provider.id)
                    .with_knowledge_base(request.knowledge_base_id);
                let session_id = session.id.clone();
                sessions.insert(session);
                session_id
            }
        };

        sessions.append_message(&session_id, Message::user(request.text.clone()))?;
        let placeholder = Message::assistant_placeholder();
        let message_id = placeholder.id.clone();
        sessions.append_message(&session_id, placeholder)?;

        let token = CancellationToken::new();
        in_flight.insert(session_id.clone(), token.clone());
        SEND_STARTED.click();
        tracing::info!(%session_id, %message_id, model = %request.model_id, "send started");

        Ok(PendingSend {
            session_id,
            message_id,
            query: request.text,
            model_id: request.model_id,
            provider,
            token,
        })
    }

    /// Stream the answer of a begun send into its assistant message.
    pub async fn run(&self, pending: PendingSend, observer: &mut dyn SendObserver) -> SendOutcome {
        let started = Instant::now();
        observer.on_state(SendState::Sending);
        let result = self.stream_answer(&pending, started, observer).await;

        lock(&self.in_flight).remove(&pending.session_id);
        SEND_DURATION.add(started.elapsed().as_secs_f64());

        let status = match result {
            Ok(reason) => {
                match reason {
                    CompletionReason::Cancelled | CompletionReason::SessionDeleted => {
                        SEND_CANCELLED.click()
                    }
                    CompletionReason::Done | CompletionReason::TransportClosed => {
                        SEND_COMPLETED.click()
                    }
                }
                tracing::info!(
                    session_id = %pending.session_id,
                    message_id = %pending.message_id,
                    ?reason,
                    "send completed"
                );
                observer.on_state(SendState::Completed);
                SendStatus::Completed(reason)
            }
            Err(err) => {
                SEND_FAILED.click();
                tracing::warn!(
                    session_id = %pending.session_id,
                    message_id = %pending.message_id,
                    error = %err,
                    "send failed"
                );
                observer.on_failed(&err);
                observer.on_state(SendState::Failed);
                SendStatus::Failed(err)
            }
        };
        SendOutcome {
            session_id: pending.session_id,
            message_id: pending.message_id,
            status,
        }
    }

    /// [`begin`](Self::begin) and [`run`](Self::run) in one call.
    pub async fn send(
        &self,
        request: SendRequest,
        observer: &mut dyn SendObserver,
    ) -> Result<SendOutcome> {
        let pending = self.begin(request)?;
        Ok(self.run(pending, observer).await)
    }

    async fn stream_answer(
        &self,
        pending: &PendingSend,
        started: Instant,
        observer: &mut dyn SendObserver,
    ) -> Result<CompletionReason> {
        if pending.token.is_cancelled() {
            return Ok(self.interruption(pending));
        }
        let Some((history, knowledge_base_id)) = lock(&self.sessions)
            .get(&pending.session_id)
            .map(|s| (s.history_excluding(&pending.message_id), s.knowledge_base_id.clone()))
        else {
            return Ok(CompletionReason::SessionDeleted);
        };
        // A deleted knowledge base leaves the session reference behind; it adds nothing.
        let knowledge_base_id =
            knowledge_base_id.filter(|id| lock(&self.knowledge_bases).get(id).is_some());
        let settings = self.settings();

        let route = tokio::select! {
            _ = pending.token.cancelled() => return Ok(self.interruption(pending)),
            route = self.choose_route(&settings, knowledge_base_id.as_deref()) => route,
        };

        let request: StreamRequest = match route {
            Route::Retrieval {
                backend_url,
                knowledge_base_id,
            } => {
                let history = augment_history(history, settings.system_prompt.clone());
                build_retrieval_chat_request(
                    &backend_url,
                    &pending.model_id,
                    &history,
                    &knowledge_base_id,
                )?
            }
            Route::Direct => {
                let context = {
                    let knowledge_bases = lock(&self.knowledge_bases);
                    let knowledge_base = knowledge_base_id
                        .as_deref()
                        .and_then(|id| knowledge_bases.get(id));
                    select_context(&pending.query, knowledge_base)
                };
                if !context.sources.is_empty() {
                    let recorded = lock(&self.sessions).set_message_sources(
                        &pending.session_id,
                        &pending.message_id,
                        context.sources.clone(),
                    );
                    if !recorded {
                        return Ok(CompletionReason::SessionDeleted);
                    }
                    observer.on_sources(&context.sources);
                }
                let prompt = compose_system_prompt(settings.system_prompt.as_deref(), &context);
                let history = augment_history(history, prompt);
                build_chat_request(&pending.provider, &pending.model_id, &history)?
            }
        };

        let body = tokio::select! {
            _ = pending.token.cancelled() => return Ok(self.interruption(pending)),
            body = self.transport.open_stream(&request.request) => body?,
        };
        observer.on_state(SendState::Streaming);

        let mut events = Box::pin(decode_stream(body, request.mode));
        let mut content = String::new();
        let mut first_event = true;
        loop {
            let event = tokio::select! {
                biased;
                _ = pending.token.cancelled() => return Ok(self.interruption(pending)),
                event = next_event(&mut events, settings.stream_idle_timeout) => event?,
            };
            if first_event {
                STREAM_TTFB.add(started.elapsed().as_secs_f64());
                first_event = false;
            }
            match event {
                None => return Ok(CompletionReason::TransportClosed),
                Some(StreamEvent::Done) => return Ok(CompletionReason::Done),
                Some(StreamEvent::Content(delta)) => {
                    content.push_str(&delta);
                    let applied = lock(&self.sessions).set_message_content(
                        &pending.session_id,
                        &pending.message_id,
                        &content,
                    );
                    if !applied {
                        STREAM_DISCARDED_EVENTS.click();
                        return Ok(CompletionReason::SessionDeleted);
                    }
                    observer.on_delta(&delta, &content);
                }
                Some(StreamEvent::Sources(sources)) => {
                    let applied = lock(&self.sessions).set_message_sources(
                        &pending.session_id,
                        &pending.message_id,
                        sources.clone(),
                    );
                    if !applied {
                        STREAM_DISCARDED_EVENTS.click();
                        return Ok(CompletionReason::SessionDeleted);
                    }
                    observer.on_sources(&sources);
                }
                Some(StreamEvent::Error(message)) => {
                    return Err(Error::streaming(
                        format!("backend reported an error: {message}"),
                        None,
                    ));
                }
            }
        }
    }

    async fn choose_route(
        &self,
        settings: &OrchestratorSettings,
        knowledge_base_id: Option<&str>,
    ) -> Route {
        let (Some(backend_url), Some(knowledge_base_id)) =
            (settings.retrieval_url.as_deref(), knowledge_base_id)
        else {
            return Route::Direct;
        };
        let healthy = match retrieval_health_url(backend_url) {
            Ok(url) => self.transport.probe(&url).await,
            Err(err) => {
                tracing::warn!(error = %err, "retrieval backend URL is unusable");
                false
            }
        };
        if healthy {
            tracing::debug!(backend_url, knowledge_base_id, "routing through retrieval backend");
            Route::Retrieval {
                backend_url: backend_url.to_string(),
                knowledge_base_id: knowledge_base_id.to_string(),
            }
        } else {
            RETRIEVAL_FALLBACKS.click();
            tracing::warn!(backend_url, "retrieval backend unavailable; answering with local context");
            Route::Direct
        }
    }

    fn interruption(&self, pending: &PendingSend) -> CompletionReason {
        if lock(&self.sessions).contains(&pending.session_id) {
            CompletionReason::Cancelled
        } else {
            CompletionReason::SessionDeleted
        }
    }
}

async fn next_event<S>(events: &mut S, idle: Option<Duration>) -> Result<Option<StreamEvent>>
where
    S: Stream<Item = Result<StreamEvent>> + Unpin,
{
    match idle {
        Some(limit) => tokio::time::timeout(limit, events.next())
            .await
            .map_err(|_| {
                Error::timeout(
                    "no stream activity within the idle timeout",
                    Some(limit.as_secs_f64()),
                )
            })?
            .transpose(),
        None => events.next().await.transpose(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use url::Url;

    use super::*;
    use crate::adapter::RequestDescriptor;
    use crate::client::ByteStream;
    use crate::types::{ProviderKind, Role};

    struct ScriptedTransport {
        chunks: Vec<&'static str>,
        hang_after: bool,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(chunks: Vec<&'static str>) -> Self {
            Self {
                chunks,
                hang_after: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn hanging(chunks: Vec<&'static str>) -> Self {
            Self {
                hang_after: true,
                ..Self::new(chunks)
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open_stream(&self, _: &RequestDescriptor) -> Result<ByteStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let chunks: Vec<Result<Bytes>> = self
                .chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect();
            if self.hang_after {
                Ok(Box::pin(stream::iter(chunks).chain(stream::pending())))
            } else {
                Ok(Box::pin(stream::iter(chunks)))
            }
        }

        async fn probe(&self, _: &Url) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct Recorder {
        states: Vec<SendState>,
        contents: Vec<String>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl SendObserver for Recorder {
        fn on_state(&mut self, state: SendState) {
            self.states.push(state);
        }

        fn on_delta(&mut self, _delta: &str, content: &str) {
            self.contents.push(content.to_string());
            if let Some((after, token)) = &self.cancel_after
                && self.contents.len() == *after
            {
                token.cancel();
            }
        }
    }

    fn orchestrator(transport: ScriptedTransport) -> Orchestrator<ScriptedTransport> {
        Orchestrator::new(transport, vec![Provider::local()])
    }

    #[tokio::test]
    async fn content_is_cumulative() {
        let orch = orchestrator(ScriptedTransport::new(vec![
            "{\"message\":{\"content\":\"He\"}}\n{\"message\":{\"con",
            "tent\":\"llo\"}}\n{\"message\":{\"content\":\"!\"},\"done\":true}\n",
        ]));
        let mut recorder = Recorder::default();
        let outcome = orch
            .send(SendRequest::new("hi", "llama3", "local-ollama"), &mut recorder)
            .await
            .unwrap();

        assert_eq!(outcome.reason(), Some(CompletionReason::Done));
        assert_eq!(recorder.contents, vec!["He", "Hello", "Hello!"]);
        assert_eq!(
            recorder.states,
            vec![SendState::Sending, SendState::Streaming, SendState::Completed]
        );
        let session = orch.session(&outcome.session_id).unwrap();
        assert_eq!(session.title, "hi");
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[1].content, "Hello!");
        assert!(!orch.is_busy(&outcome.session_id));
    }

    #[tokio::test]
    async fn cancel_after_two_deltas_keeps_partial_answer() {
        let orch = orchestrator(ScriptedTransport::hanging(vec![
            "{\"message\":{\"content\":\"c1\"}}\n",
            "{\"message\":{\"content\":\"c2\"}}\n",
        ]));
        let pending = orch
            .begin(SendRequest::new("hi", "llama3", "local-ollama"))
            .unwrap();
        let mut recorder = Recorder {
            cancel_after: Some((2, pending.cancellation_token())),
            ..Recorder::default()
        };
        let outcome = orch.run(pending, &mut recorder).await;

        assert_eq!(outcome.state(), SendState::Completed);
        assert_eq!(outcome.reason(), Some(CompletionReason::Cancelled));
        let session = orch.session(&outcome.session_id).unwrap();
        assert_eq!(session.messages[1].content, "c1c2");
    }

    #[tokio::test]
    async fn configuration_error_precedes_transport() {
        let cloud = Provider::new("cloud", ProviderKind::OpenAiCompatibleSse, "https://api.example.com/v1");
        let orch = Orchestrator::new(ScriptedTransport::new(vec![]), vec![cloud]);
        let err = orch
            .send(SendRequest::new("hi", "gpt-4o-mini", "cloud"), &mut NoopObserver)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(orch.transport().calls.load(Ordering::SeqCst), 0);
        assert!(orch.sessions().is_empty());
    }

    #[tokio::test]
    async fn busy_session_rejects_second_send() {
        let orch = orchestrator(ScriptedTransport::hanging(vec![]));
        let pending = orch
            .begin(SendRequest::new("first", "llama3", "local-ollama"))
            .unwrap();
        let session_id = pending.session_id().to_string();
        let err = orch
            .begin(SendRequest::new("second", "llama3", "local-ollama").with_session(&session_id))
            .unwrap_err();
        assert!(err.is_session_busy());
        assert_eq!(orch.session(&session_id).unwrap().messages.len(), 2);

        assert!(orch.cancel(&session_id));
        let outcome = orch.run(pending, &mut NoopObserver).await;
        assert_eq!(outcome.reason(), Some(CompletionReason::Cancelled));
        assert!(!orch.is_busy(&session_id));
    }

    #[tokio::test]
    async fn in_band_error_fails_and_keeps_partial() {
        let orch = orchestrator(ScriptedTransport::new(vec![
            "{\"message\":{\"content\":\"partial\"}}\n{\"error\":\"model crashed\"}\n",
        ]));
        let outcome = orch
            .send(SendRequest::new("hi", "llama3", "local-ollama"), &mut NoopObserver)
            .await
            .unwrap();
        assert_eq!(outcome.state(), SendState::Failed);
        assert!(outcome.error().unwrap().to_string().contains("model crashed"));
        let session = orch.session(&outcome.session_id).unwrap();
        assert_eq!(session.messages[1].content, "partial");
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let orch = orchestrator(ScriptedTransport::new(vec![]));
        let err = orch
            .begin(SendRequest::new("  \n", "llama3", "local-ollama"))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_fails_send() {
        let orch = orchestrator(ScriptedTransport::hanging(vec![
            "{\"message\":{\"content\":\"slow\"}}\n",
        ]))
        .with_settings(OrchestratorSettings {
            stream_idle_timeout: Some(Duration::from_secs(5)),
            ..OrchestratorSettings::default()
        });
        let outcome = orch
            .send(SendRequest::new("hi", "llama3", "local-ollama"), &mut NoopObserver)
            .await
            .unwrap();
        assert!(outcome.error().unwrap().is_timeout());
        let session = orch.session(&outcome.session_id).unwrap();
        assert_eq!(session.messages[1].content, "slow");
    }
}
