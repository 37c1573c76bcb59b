use std::path::Path;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{Error, Result};

/// File extensions accepted by [`Document::from_path`].
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

/// A user document owned by a knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Unique document identifier.
    pub id: String,

    /// Display name, usually the file name.
    pub name: String,

    /// Full text.
    pub content: String,

    /// Size in bytes.
    pub size: u64,

    /// MIME type.
    #[serde(rename = "type")]
    pub r#type: String,

    /// When the document was added.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Document {
    /// Create a plain-text document.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            size: content.len() as u64,
            content,
            r#type: "text/plain".to_string(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Load a plain-text document from disk.
    ///
    /// Only `.txt` and `.md` files are accepted.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !TEXT_EXTENSIONS.contains(&extension.as_str()) {
            return Err(Error::validation(
                format!("unsupported document type: .{extension}"),
                Some("path".to_string()),
            ));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|err| Error::io(format!("failed to read {}", path.display()), err))?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("document")
            .to_string();
        let mut document = Self::new(name, content);
        if extension == "md" {
            document.r#type = "text/markdown".to_string();
        }
        Ok(document)
    }
}

/// A named collection of documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBase {
    /// Unique knowledge base identifier.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Documents in insertion order.
    #[serde(default)]
    pub documents: Vec<Document>,

    /// When the knowledge base was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl KnowledgeBase {
    /// Create an empty knowledge base.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            documents: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a document, builder style.
    pub fn with_document(mut self, document: Document) -> Self {
        self.documents.push(document);
        self
    }

    /// Total size of all documents in bytes.
    pub fn total_size(&self) -> u64 {
        self.documents.iter().map(|d| d.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_size_is_bytes() {
        let document = Document::new("whale.txt", "鲸鱼");
        assert_eq!(document.size, 6);
        assert_eq!(document.r#type, "text/plain");
    }

    #[test]
    fn from_path_rejects_binary_formats() {
        let err = Document::from_path("report.pdf").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn from_path_reads_text() {
        let dir = std::env::temp_dir().join(format!("whalechat-doc-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("notes.md");
        std::fs::write(&path, "# engine\nchange the oil").unwrap();

        let document = Document::from_path(&path).unwrap();
        assert_eq!(document.name, "notes.md");
        assert_eq!(document.r#type, "text/markdown");
        assert!(document.content.contains("oil"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn knowledge_base_serialization_uses_type_field() {
        let kb = KnowledgeBase::new("cars").with_document(Document::new("engine.txt", "oil"));
        let json = serde_json::to_value(&kb).unwrap();
        assert_eq!(json["documents"][0]["type"], "text/plain");
        assert_eq!(kb.total_size(), 3);
    }
}
