//! In-memory conversation state and its on-disk form.
//!
//! [`SessionStore`] and [`KnowledgeBaseStore`] hold plain data.  The orchestrator is
//! their only writer while the program runs; everything else reads snapshots.
//! [`JsonFile`] loads and replaces whole collections, one file per entity type.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{from_reader, to_writer_pretty};

use crate::error::{Error, Result};
use crate::types::{ChatSession, Document, KnowledgeBase, Message};

/// Format version written into every store file.
pub const STORE_FILE_VERSION: u8 = 1;

/// File holding sessions inside a data directory.
pub const SESSIONS_FILE: &str = "sessions.json";

/// File holding knowledge bases inside a data directory.
pub const KNOWLEDGE_BASES_FILE: &str = "knowledge_bases.json";

/////////////////////////////////////////// SessionStore //////////////////////////////////////////

/// Chat sessions, most recently created first.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Vec<ChatSession>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from previously persisted sessions.
    pub fn from_sessions(sessions: Vec<ChatSession>) -> Self {
        Self { sessions }
    }

    /// All sessions, newest first.
    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns true if a session with this id exists.
    pub fn contains(&self, session_id: &str) -> bool {
        self.get(session_id).is_some()
    }

    /// Look up a session.
    pub fn get(&self, session_id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    fn get_mut(&mut self, session_id: &str) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| s.id == session_id)
    }

    /// Add a session at the front.
    pub fn insert(&mut self, session: ChatSession) {
        self.sessions.insert(0, session);
    }

    /// Remove a session and return it.
    pub fn delete(&mut self, session_id: &str) -> Option<ChatSession> {
        let index = self.sessions.iter().position(|s| s.id == session_id)?;
        Some(self.sessions.remove(index))
    }

    /// Append a message to the end of a session.
    pub fn append_message(&mut self, session_id: &str, message: Message) -> Result<()> {
        let session = self
            .get_mut(session_id)
            .ok_or_else(|| Error::session_not_found(session_id))?;
        session.messages.push(message);
        session.touch();
        Ok(())
    }

    /// Replace the content of a message.
    ///
    /// Returns false when the session or message no longer exists.
    pub fn set_message_content(&mut self, session_id: &str, message_id: &str, content: &str) -> bool {
        let Some(session) = self.get_mut(session_id) else {
            return false;
        };
        let Some(message) = session.message_mut(message_id) else {
            return false;
        };
        message.content.clear();
        message.content.push_str(content);
        session.touch();
        true
    }

    /// Record the sources of a message.
    ///
    /// Returns false when the session or message no longer exists.
    pub fn set_message_sources(
        &mut self,
        session_id: &str,
        message_id: &str,
        sources: Vec<String>,
    ) -> bool {
        let Some(session) = self.get_mut(session_id) else {
            return false;
        };
        match session.message_mut(message_id) {
            Some(message) => {
                message.sources = Some(sources);
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Change the model used for future sends of a session.
    pub fn set_model(&mut self, session_id: &str, model_id: &str, provider_id: &str) -> Result<()> {
        let session = self
            .get_mut(session_id)
            .ok_or_else(|| Error::session_not_found(session_id))?;
        session.model_id = model_id.to_string();
        session.provider_id = provider_id.to_string();
        session.touch();
        Ok(())
    }

    /// Attach or detach a knowledge base.
    pub fn set_knowledge_base(
        &mut self,
        session_id: &str,
        knowledge_base_id: Option<String>,
    ) -> Result<()> {
        let session = self
            .get_mut(session_id)
            .ok_or_else(|| Error::session_not_found(session_id))?;
        session.knowledge_base_id = knowledge_base_id;
        session.touch();
        Ok(())
    }
}

//////////////////////////////////////// KnowledgeBaseStore ///////////////////////////////////////

/// Knowledge bases in creation order.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBaseStore {
    knowledge_bases: Vec<KnowledgeBase>,
}

impl KnowledgeBaseStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from previously persisted knowledge bases.
    pub fn from_knowledge_bases(knowledge_bases: Vec<KnowledgeBase>) -> Self {
        Self { knowledge_bases }
    }

    /// All knowledge bases.
    pub fn knowledge_bases(&self) -> &[KnowledgeBase] {
        &self.knowledge_bases
    }

    /// Look up a knowledge base.
    pub fn get(&self, knowledge_base_id: &str) -> Option<&KnowledgeBase> {
        self.knowledge_bases.iter().find(|kb| kb.id == knowledge_base_id)
    }

    /// Add a knowledge base and return its id.
    pub fn insert(&mut self, knowledge_base: KnowledgeBase) -> String {
        let id = knowledge_base.id.clone();
        self.knowledge_bases.push(knowledge_base);
        id
    }

    /// Remove a knowledge base.  Sessions referring to it keep the dangling id.
    pub fn delete(&mut self, knowledge_base_id: &str) -> Option<KnowledgeBase> {
        let index = self
            .knowledge_bases
            .iter()
            .position(|kb| kb.id == knowledge_base_id)?;
        Some(self.knowledge_bases.remove(index))
    }

    /// Append a document to a knowledge base.
    pub fn add_document(&mut self, knowledge_base_id: &str, document: Document) -> Result<()> {
        let kb = self.get_mut(knowledge_base_id)?;
        kb.documents.push(document);
        Ok(())
    }

    /// Remove a document.  Returns whether it was present.
    pub fn remove_document(&mut self, knowledge_base_id: &str, document_id: &str) -> Result<bool> {
        let kb = self.get_mut(knowledge_base_id)?;
        let before = kb.documents.len();
        kb.documents.retain(|d| d.id != document_id);
        Ok(kb.documents.len() != before)
    }

    fn get_mut(&mut self, knowledge_base_id: &str) -> Result<&mut KnowledgeBase> {
        self.knowledge_bases
            .iter_mut()
            .find(|kb| kb.id == knowledge_base_id)
            .ok_or_else(|| {
                Error::not_found(
                    format!("knowledge base {knowledge_base_id} does not exist"),
                    Some("knowledge_base".to_string()),
                    Some(knowledge_base_id.to_string()),
                )
            })
    }
}

///////////////////////////////////////////// JsonFile ////////////////////////////////////////////

#[derive(Serialize, Deserialize)]
struct StoreFile<I> {
    version: u8,
    items: I,
}

/// A JSON file holding one collection.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    /// A store file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The sessions file inside `data_dir`.
    pub fn sessions(data_dir: &Path) -> Self {
        Self::new(data_dir.join(SESSIONS_FILE))
    }

    /// The knowledge-base file inside `data_dir`.
    pub fn knowledge_bases(data_dir: &Path) -> Self {
        Self::new(data_dir.join(KNOWLEDGE_BASES_FILE))
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every item.  A missing file reads as empty.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(Error::io(
                    format!("failed to open {}", self.path.display()),
                    err,
                ));
            }
        };
        let store: StoreFile<Vec<T>> = from_reader(BufReader::new(file)).map_err(|err| {
            Error::serialization(
                format!("failed to parse {}", self.path.display()),
                Some(Box::new(err)),
            )
        })?;
        if store.version != STORE_FILE_VERSION {
            return Err(Error::serialization(
                format!(
                    "{} has version {}, expected {}",
                    self.path.display(),
                    store.version,
                    STORE_FILE_VERSION
                ),
                None,
            ));
        }
        Ok(store.items)
    }

    /// Replace the file with `items`.
    ///
    /// The new contents are written beside the file and renamed over it, so a reader
    /// sees either the old collection or the new one.
    pub fn save<T: Serialize>(&self, items: &[T]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                Error::io(format!("failed to create {}", parent.display()), err)
            })?;
        }
        let staging = self.path.with_extension("json.tmp");
        if let Err(err) = self.write_staging(&staging, items) {
            let _ = fs::remove_file(&staging);
            return Err(err);
        }
        fs::rename(&staging, &self.path).map_err(|err| {
            let _ = fs::remove_file(&staging);
            Error::io(format!("failed to replace {}", self.path.display()), err)
        })
    }

    fn write_staging<T: Serialize>(&self, staging: &Path, items: &[T]) -> Result<()> {
        let file = File::create(staging)
            .map_err(|err| Error::io(format!("failed to create {}", staging.display()), err))?;
        let store = StoreFile {
            version: STORE_FILE_VERSION,
            items,
        };
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, &store).map_err(|err| {
            Error::serialization(
                format!("failed to serialize {}", self.path.display()),
                Some(Box::new(err)),
            )
        })?;
        writer
            .flush()
            .map_err(|err| Error::io(format!("failed to write {}", staging.display()), err))?;
        let file = writer.into_inner().map_err(|err| {
            Error::io(
                format!("failed to write {}", staging.display()),
                err.into_error(),
            )
        })?;
        file.sync_all()
            .map_err(|err| Error::io(format!("failed to sync {}", staging.display()), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("whalechat-store-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn sessions_are_newest_first() {
        let mut store = SessionStore::new();
        let first = ChatSession::new("first", "llama3", "local-ollama");
        let second = ChatSession::new("second", "llama3", "local-ollama");
        let second_id = second.id.clone();
        store.insert(first);
        store.insert(second);
        assert_eq!(store.sessions()[0].id, second_id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn message_updates_on_missing_targets_return_false() {
        let mut store = SessionStore::new();
        let session = ChatSession::new("hi", "llama3", "local-ollama");
        let id = session.id.clone();
        store.insert(session);

        let message = Message::assistant_placeholder();
        let message_id = message.id.clone();
        store.append_message(&id, message).unwrap();

        assert!(store.set_message_content(&id, &message_id, "hello"));
        assert!(!store.set_message_content(&id, "nope", "x"));
        assert!(!store.set_message_content("nope", &message_id, "x"));
        assert!(store.set_message_sources(&id, &message_id, vec!["a.txt".to_string()]));

        let message = store.get(&id).unwrap().message(&message_id).unwrap();
        assert_eq!(message.content, "hello");
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.sources.as_deref(), Some(&["a.txt".to_string()][..]));

        store.delete(&id).unwrap();
        assert!(!store.set_message_content(&id, &message_id, "late"));
        assert!(!store.contains(&id));
        assert!(
            store
                .append_message(&id, Message::user("late"))
                .unwrap_err()
                .is_session_not_found()
        );
    }

    #[test]
    fn streamed_updates_touch_the_session() {
        let mut store = SessionStore::new();
        let session = ChatSession::new("hi", "llama3", "local-ollama");
        let id = session.id.clone();
        store.insert(session);
        let message = Message::assistant_placeholder();
        let message_id = message.id.clone();
        store.append_message(&id, message).unwrap();

        let appended = store.get(&id).unwrap().updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(store.set_message_content(&id, &message_id, "partial"));
        let streamed = store.get(&id).unwrap().updated_at;
        assert!(streamed > appended);

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(store.set_message_sources(&id, &message_id, vec!["a.txt".to_string()]));
        assert!(store.get(&id).unwrap().updated_at > streamed);
    }

    #[test]
    fn knowledge_base_documents() {
        let mut store = KnowledgeBaseStore::new();
        let id = store.insert(KnowledgeBase::new("cars"));
        let document = Document::new("engine.txt", "oil");
        let document_id = document.id.clone();
        store.add_document(&id, document).unwrap();
        assert_eq!(store.get(&id).unwrap().documents.len(), 1);
        assert!(store.remove_document(&id, &document_id).unwrap());
        assert!(!store.remove_document(&id, &document_id).unwrap());
        assert!(
            store
                .add_document("missing", Document::new("x", "y"))
                .unwrap_err()
                .is_not_found()
        );
        assert!(store.delete(&id).is_some());
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn json_file_round_trip() {
        let dir = temp_dir();
        let file = JsonFile::sessions(&dir.join("nested"));
        assert!(file.load::<ChatSession>().unwrap().is_empty());

        let mut session = ChatSession::new("why is the sky blue", "llama3", "local-ollama");
        session.messages.push(Message::user("why is the sky blue"));
        file.save(std::slice::from_ref(&session)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["items"][0]["modelId"], "llama3");

        let loaded: Vec<ChatSession> = file.load().unwrap();
        assert_eq!(loaded, vec![session]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_write_keeps_previous_file() {
        let dir = temp_dir();
        let file = JsonFile::sessions(&dir);
        let kept = ChatSession::new("kept", "llama3", "local-ollama");
        file.save(std::slice::from_ref(&kept)).unwrap();

        let staging = file.path().with_extension("json.tmp");
        std::os::unix::fs::symlink("/dev/full", &staging).unwrap();
        let replacement = ChatSession::new("lost", "llama3", "local-ollama");
        assert!(file.save(&[replacement, kept.clone()]).is_err());

        assert!(fs::symlink_metadata(&staging).is_err());
        let loaded: Vec<ChatSession> = file.load().unwrap();
        assert_eq!(loaded, vec![kept]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn json_file_rejects_unknown_version() {
        let dir = temp_dir();
        let file = JsonFile::knowledge_bases(&dir);
        fs::write(file.path(), r#"{"version":7,"items":[]}"#).unwrap();
        let err = file.load::<KnowledgeBase>().unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
        fs::remove_dir_all(&dir).unwrap();
    }
}
