//! State of the interactive chat application.
//!
//! [`ChatApp`] remembers which session, model, provider, and knowledge base the user
//! has selected, turns slash commands into orchestrator calls, and persists the stores
//! after every change.

use std::path::{Path, PathBuf};

use crate::chat::commands::{ChatCommand, help_text};
use crate::chat::config::{ChatConfig, WhaleConfig};
use crate::chat::render::Renderer;
use crate::client::HttpClient;
use crate::error::{Error, Result};
use crate::orchestrator::{CompletionReason, Orchestrator, PendingSend, SendOutcome, SendRequest};
use crate::retrieval::{DEFAULT_TOP_K, RetrievalClient};
use crate::store::{JsonFile, KnowledgeBaseStore, SessionStore};
use crate::types::Document;

/// Characters of a session id shown in listings.
const SHORT_ID: usize = 8;

/// Selections and handles of a running chat application.
pub struct ChatApp {
    orchestrator: Orchestrator<HttpClient>,
    retrieval: Option<RetrievalClient>,
    data_dir: Option<PathBuf>,
    current_session: Option<String>,
    model_id: Option<String>,
    provider_id: String,
    knowledge_base_id: Option<String>,
}

impl ChatApp {
    /// Create an application around an orchestrator.
    ///
    /// With no `data_dir` nothing is persisted.
    pub fn new(
        orchestrator: Orchestrator<HttpClient>,
        retrieval: Option<RetrievalClient>,
        data_dir: Option<PathBuf>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            retrieval,
            data_dir,
            current_session: None,
            model_id: None,
            provider_id: provider_id.into(),
            knowledge_base_id: None,
        }
    }

    /// Build the application from resolved configuration, loading persisted state.
    pub fn from_config(whale: &WhaleConfig, config: &ChatConfig) -> Result<Self> {
        let http = HttpClient::with_options(whale.client_options())?;
        let retrieval = match &whale.retrieval_url {
            Some(url) => Some(RetrievalClient::new(http.clone(), url)?),
            None => None,
        };
        let data_dir = whale.data_dir();
        let sessions = JsonFile::sessions(&data_dir).load()?;
        let knowledge_bases = JsonFile::knowledge_bases(&data_dir).load()?;
        tracing::debug!(
            data_dir = %data_dir.display(),
            sessions = sessions.len(),
            knowledge_bases = knowledge_bases.len(),
            "loaded chat state"
        );

        let orchestrator = Orchestrator::new(http, whale.providers.clone())
            .with_sessions(SessionStore::from_sessions(sessions))
            .with_knowledge_bases(KnowledgeBaseStore::from_knowledge_bases(knowledge_bases))
            .with_settings(whale.orchestrator_settings());

        let mut app = Self::new(
            orchestrator,
            retrieval,
            Some(data_dir),
            whale.default_provider.clone(),
        );
        app.model_id = whale.default_model.clone();
        if let Some(id) = &config.knowledge_base {
            if app.orchestrator.knowledge_base(id).is_none() {
                return Err(Error::not_found(
                    format!("knowledge base {id} does not exist"),
                    Some("knowledge_base".to_string()),
                    Some(id.clone()),
                ));
            }
            app.knowledge_base_id = Some(id.clone());
        }
        Ok(app)
    }

    /// The orchestrator driving sends.
    pub fn orchestrator(&self) -> &Orchestrator<HttpClient> {
        &self.orchestrator
    }

    /// The current session, if any.
    pub fn current_session(&self) -> Option<&str> {
        self.current_session.as_deref()
    }

    /// The selected model, if any.
    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    /// The selected provider.
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// The selected knowledge base, if any.
    pub fn knowledge_base_id(&self) -> Option<&str> {
        self.knowledge_base_id.as_deref()
    }

    /// One-line description of the current selections.
    pub fn status_line(&self) -> String {
        let model = self.model_id.as_deref().unwrap_or("<no model>");
        let mut status = format!("{model} via {}", self.provider_id);
        if let Some(kb) = self
            .knowledge_base_id
            .as_deref()
            .and_then(|id| self.orchestrator.knowledge_base(id))
        {
            status.push_str(&format!(", knowledge base '{}'", kb.name));
        }
        status
    }

    /// Start sending `text` in the current session, or in a new one.
    pub fn begin_send(&mut self, text: &str) -> Result<PendingSend> {
        let Some(model_id) = self.model_id.clone() else {
            return Err(Error::configuration(
                "no model selected; use /models and /model <name>",
                Some("model".to_string()),
            ));
        };
        let mut request = SendRequest::new(text, model_id, self.provider_id.clone());
        match &self.current_session {
            Some(session_id) => request = request.with_session(session_id.clone()),
            None => {
                if let Some(kb) = &self.knowledge_base_id {
                    request = request.with_knowledge_base(kb.clone());
                }
            }
        }
        let pending = self.orchestrator.begin(request)?;
        self.current_session = Some(pending.session_id().to_string());
        Ok(pending)
    }

    /// Stream an answer to completion, then persist.
    pub async fn run_send<R: Renderer>(
        &mut self,
        pending: PendingSend,
        renderer: &mut R,
    ) -> SendOutcome {
        let outcome = self.orchestrator.run(pending, renderer).await;
        if outcome.reason() == Some(CompletionReason::Cancelled) {
            renderer.print_interrupted();
        }
        if let Err(err) = self.persist() {
            renderer.print_error(&err.to_string());
        }
        outcome
    }

    /// Write sessions and knowledge bases to the data directory.
    pub fn persist(&self) -> Result<()> {
        match &self.data_dir {
            Some(dir) => self.orchestrator.save_to_dir(dir),
            None => Ok(()),
        }
    }

    /// Carry out a slash command.  Returns false when the application should exit.
    pub async fn handle_command<R: Renderer>(
        &mut self,
        command: ChatCommand,
        renderer: &mut R,
    ) -> Result<bool> {
        match command {
            ChatCommand::Quit => return Ok(false),
            ChatCommand::Help => {
                for line in help_text().lines() {
                    renderer.print_info(&format!("    {line}"));
                }
            }
            ChatCommand::Invalid(message) => renderer.print_error(&message),
            ChatCommand::New => {
                self.current_session = None;
                renderer.print_info("The next message starts a new session.");
            }
            ChatCommand::Sessions => self.list_sessions(renderer),
            ChatCommand::Switch(prefix) => {
                let session_id = self.resolve_session(&prefix)?;
                if let Some(session) = self.orchestrator.session(&session_id) {
                    self.model_id = Some(session.model_id.clone());
                    self.provider_id = session.provider_id.clone();
                    self.knowledge_base_id = session.knowledge_base_id.clone();
                    renderer.print_info(&format!("Switched to '{}'", session.title));
                    for message in &session.messages {
                        renderer.print_info(&format!("{}: {}", message.role, message.content));
                    }
                }
                self.current_session = Some(session_id);
            }
            ChatCommand::Delete(prefix) => {
                let session_id = self.resolve_session(&prefix)?;
                if let Some(session) = self.orchestrator.delete_session(&session_id) {
                    renderer.print_info(&format!("Deleted '{}'", session.title));
                }
                if self.current_session.as_deref() == Some(session_id.as_str()) {
                    self.current_session = None;
                }
                self.persist()?;
            }
            ChatCommand::Model(model_id) => {
                if let Some(session_id) = &self.current_session {
                    self.orchestrator
                        .set_session_model(session_id, &model_id, &self.provider_id)?;
                    self.persist()?;
                }
                renderer.print_info(&format!("Model changed to: {model_id}"));
                self.model_id = Some(model_id);
            }
            ChatCommand::Models => {
                let provider = self.orchestrator.provider(&self.provider_id)?.clone();
                match self.orchestrator.transport().list_models(&provider).await {
                    Ok(models) if models.is_empty() => {
                        renderer.print_info(&format!("{} serves no models", provider.id))
                    }
                    Ok(models) => {
                        for model in models {
                            renderer.print_info(&format!("  {model}"));
                        }
                    }
                    Err(err) => {
                        tracing::warn!(provider = %provider.id, error = %err, "listing models failed");
                        renderer.print_info(&format!("{} serves no models", provider.id));
                    }
                }
            }
            ChatCommand::Provider(provider_id) => {
                self.orchestrator.provider(&provider_id)?;
                if let (Some(session_id), Some(model_id)) = (&self.current_session, &self.model_id) {
                    self.orchestrator
                        .set_session_model(session_id, model_id, &provider_id)?;
                    self.persist()?;
                }
                renderer.print_info(&format!("Provider changed to: {provider_id}"));
                self.provider_id = provider_id;
            }
            ChatCommand::KnowledgeBase(id) => {
                let kb = self.orchestrator.knowledge_base(&id).ok_or_else(|| {
                    Error::not_found(
                        format!("knowledge base {id} does not exist"),
                        Some("knowledge_base".to_string()),
                        Some(id.clone()),
                    )
                })?;
                self.attach_knowledge_base(Some(id))?;
                renderer.print_info(&format!("Using knowledge base '{}'", kb.name));
            }
            ChatCommand::ClearKnowledgeBase => {
                self.attach_knowledge_base(None)?;
                renderer.print_info("Knowledge base detached.");
            }
            ChatCommand::KnowledgeBases => {
                let knowledge_bases = self.orchestrator.knowledge_bases();
                if knowledge_bases.is_empty() {
                    renderer.print_info("No knowledge bases. Create one with /kb-new <name>.");
                }
                for kb in knowledge_bases {
                    renderer.print_info(&format!(
                        "  {}  {} ({} documents, {} bytes)",
                        kb.id,
                        kb.name,
                        kb.documents.len(),
                        kb.total_size()
                    ));
                    if self.knowledge_base_id.as_deref() == Some(kb.id.as_str()) {
                        for document in &kb.documents {
                            renderer.print_info(&format!("      {}  {}", document.id, document.name));
                        }
                    }
                }
            }
            ChatCommand::NewKnowledgeBase(name) => {
                let id = self.orchestrator.create_knowledge_base(&name);
                self.attach_knowledge_base(Some(id.clone()))?;
                renderer.print_info(&format!("Created knowledge base '{name}' ({id})"));
            }
            ChatCommand::DeleteKnowledgeBase(id) => {
                let kb = self.orchestrator.delete_knowledge_base(&id).ok_or_else(|| {
                    Error::not_found(
                        format!("knowledge base {id} does not exist"),
                        Some("knowledge_base".to_string()),
                        Some(id.clone()),
                    )
                })?;
                if self.knowledge_base_id.as_deref() == Some(id.as_str()) {
                    self.knowledge_base_id = None;
                }
                self.persist()?;
                renderer.print_info(&format!("Deleted knowledge base '{}'", kb.name));
            }
            ChatCommand::AddDocument(path) => self.add_document(Path::new(&path), renderer).await?,
            ChatCommand::RemoveDocument(document) => self.remove_document(&document, renderer)?,
            ChatCommand::Rag(query) => {
                let Some(retrieval) = &self.retrieval else {
                    renderer.print_error("no retrieval backend configured");
                    return Ok(true);
                };
                let answer = retrieval.query(&query, DEFAULT_TOP_K).await?;
                renderer.print_info(&answer.answer);
                renderer.print_info(&format!("[{} documents, status {}]", answer.docs.len(), answer.status));
            }
            ChatCommand::System(prompt) => {
                match &prompt {
                    Some(p) => renderer.print_info(&format!("System prompt set to: {p}")),
                    None => renderer.print_info("System prompt cleared."),
                }
                self.orchestrator.set_system_prompt(prompt);
            }
            ChatCommand::Health => match &self.retrieval {
                Some(retrieval) => {
                    if retrieval.health().await {
                        renderer.print_info(&format!("{} is online", retrieval.base_url()));
                    } else {
                        renderer.print_info(&format!(
                            "{} is offline; answering with local context",
                            retrieval.base_url()
                        ));
                    }
                }
                None => renderer.print_info("No retrieval backend configured; local context only."),
            },
        }
        Ok(true)
    }

    /// Resolve a session id or a unique prefix of one.
    pub fn resolve_session(&self, prefix: &str) -> Result<String> {
        let sessions = self.orchestrator.sessions();
        if let Some(session) = sessions.iter().find(|s| s.id == prefix) {
            return Ok(session.id.clone());
        }
        let matches: Vec<&str> = sessions
            .iter()
            .filter(|s| s.id.starts_with(prefix))
            .map(|s| s.id.as_str())
            .collect();
        match matches.as_slice() {
            [id] => Ok(id.to_string()),
            [] => Err(Error::session_not_found(prefix)),
            _ => Err(Error::validation(
                format!("'{prefix}' matches {} sessions", matches.len()),
                Some("session".to_string()),
            )),
        }
    }

    fn list_sessions<R: Renderer>(&self, renderer: &mut R) {
        let sessions = self.orchestrator.sessions();
        if sessions.is_empty() {
            renderer.print_info("No sessions yet.");
        }
        for session in sessions {
            let marker = if self.current_session.as_deref() == Some(session.id.as_str()) {
                "*"
            } else {
                " "
            };
            let short: String = session.id.chars().take(SHORT_ID).collect();
            renderer.print_info(&format!(
                "{marker} {short}  {}  ({} messages, {})",
                session.title,
                session.messages.len(),
                session.model_id
            ));
        }
    }

    fn attach_knowledge_base(&mut self, knowledge_base_id: Option<String>) -> Result<()> {
        if let Some(session_id) = &self.current_session {
            self.orchestrator
                .set_session_knowledge_base(session_id, knowledge_base_id.clone())?;
        }
        self.knowledge_base_id = knowledge_base_id;
        self.persist()
    }

    async fn add_document<R: Renderer>(&mut self, path: &Path, renderer: &mut R) -> Result<()> {
        let Some(kb_id) = self.knowledge_base_id.clone() else {
            return Err(Error::validation(
                "attach a knowledge base first with /kb or /kb-new",
                Some("knowledge_base".to_string()),
            ));
        };
        let document = Document::from_path(path)?;
        let name = document.name.clone();
        let size = document.size;
        if let Some(retrieval) = &self.retrieval
            && let Err(err) = retrieval.sync_document(&kb_id, &document).await
        {
            tracing::warn!(document = %name, error = %err, "document sync failed");
            renderer.print_error(&format!("could not sync {name} to the retrieval backend: {err}"));
        }
        self.orchestrator.add_document(&kb_id, document)?;
        self.persist()?;
        renderer.print_info(&format!("Added {name} ({size} bytes)"));
        Ok(())
    }

    fn remove_document<R: Renderer>(&mut self, document: &str, renderer: &mut R) -> Result<()> {
        let Some(kb_id) = self.knowledge_base_id.clone() else {
            return Err(Error::validation(
                "attach a knowledge base first with /kb or /kb-new",
                Some("knowledge_base".to_string()),
            ));
        };
        let found = self.orchestrator.knowledge_base(&kb_id).and_then(|kb| {
            kb.documents
                .iter()
                .find(|d| d.id == document || d.name == document)
                .map(|d| (d.id.clone(), d.name.clone()))
        });
        let Some((document_id, name)) = found else {
            return Err(Error::not_found(
                format!("no document {document} in knowledge base {kb_id}"),
                Some("document".to_string()),
                Some(document.to_string()),
            ));
        };
        self.orchestrator.remove_document(&kb_id, &document_id)?;
        self.persist()?;
        renderer.print_info(&format!("Removed {name}"));
        Ok(())
    }
}
