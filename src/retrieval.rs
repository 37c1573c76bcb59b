//! Client for the retrieval backend's non-chat endpoints.

use reqwest::Method;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::multipart::Form;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::adapter::{RequestDescriptor, endpoint, retrieval_health_url};
use crate::client::{HttpClient, Transport};
use crate::error::{Error, Result};
use crate::types::Document;

/// Number of documents a RAG query asks for unless told otherwise.
pub const DEFAULT_TOP_K: usize = 3;

/// One document returned by a RAG query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagDocument {
    /// Matched text.
    pub document: String,

    /// Metadata stored alongside the text.
    #[serde(default)]
    pub metadata: Option<Value>,

    /// Distance from the query, when the backend reports it.
    #[serde(default)]
    pub distance: Option<f64>,
}

/// Answer of a RAG query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagAnswer {
    /// Text answer assembled by the backend.
    pub answer: String,

    /// Retrieved documents.
    #[serde(default)]
    pub docs: Vec<RagDocument>,

    /// Backend status, e.g. `success` or `empty`.
    #[serde(default)]
    pub status: String,
}

#[derive(Serialize)]
struct RagQuery<'a> {
    query: &'a str,
    top_k: usize,
}

/// Handle on a retrieval backend.
#[derive(Debug, Clone)]
pub struct RetrievalClient {
    http: HttpClient,
    base_url: String,
}

impl RetrievalClient {
    /// Create a client for the backend at `base_url`.
    pub fn new(http: HttpClient, base_url: &str) -> Result<Self> {
        retrieval_health_url(base_url)?;
        Ok(Self {
            http,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    /// Root URL of the backend.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns true if the backend reports itself healthy.
    pub async fn health(&self) -> bool {
        match retrieval_health_url(&self.base_url) {
            Ok(url) => self.http.probe(&url).await,
            Err(_) => false,
        }
    }

    /// Upload a document so the backend can index it under `knowledge_base_id`.
    pub async fn sync_document(&self, knowledge_base_id: &str, document: &Document) -> Result<Value> {
        let url = self.endpoint("/api/documents")?;
        let form = Form::new()
            .text("kb_id", knowledge_base_id.to_string())
            .text("name", document.name.clone())
            .text("content", document.content.clone());
        let response = self
            .http
            .reqwest()
            .post(url)
            .multipart(form)
            .timeout(self.http.options().request_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(HttpClient::process_error_response(response).await);
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Ask the backend for the `top_k` passages closest to `query`.
    pub async fn query(&self, query: &str, top_k: usize) -> Result<RagAnswer> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::validation(
                "query must not be empty",
                Some("query".to_string()),
            ));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let request = RequestDescriptor {
            method: Method::POST,
            url: self.endpoint("/api/rag/query")?,
            headers,
            body: Some(serde_json::to_value(RagQuery { query, top_k })?),
        };
        let body = self.http.fetch_text(&request).await?;
        Ok(serde_json::from_str(&body)?)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        endpoint(&self.base_url, "retrieval.baseUrl", path)
    }
}
