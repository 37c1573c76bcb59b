//! Request construction per provider flavor.
//!
//! Everything here is a pure function of its inputs: no request is sent and no
//! response is read.  Misconfigured providers are rejected with
//! [`Error::Configuration`] before a request descriptor exists, so a caller can never
//! reach the network with one.

use reqwest::Method;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::decoder::StreamMode;
use crate::error::{Error, Result};
use crate::types::{
    Model, ModelsResponse, Provider, ProviderKind, TagsResponse, WireMessage,
};

/// A fully-specified HTTP request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// HTTP method.
    pub method: Method,

    /// Absolute endpoint URL.
    pub url: Url,

    /// Request headers, including authorization when needed.
    pub headers: HeaderMap,

    /// JSON body, if any.
    pub body: Option<Value>,
}

/// A streaming chat request and the framing of its response.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// The request to send.
    pub request: RequestDescriptor,

    /// How to decode the response body.
    pub mode: StreamMode,
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    knowledge_base_id: Option<&'a str>,
}

/// Check that a provider can serve requests at all.
pub fn validate_provider(provider: &Provider) -> Result<()> {
    if !provider.enabled {
        return Err(Error::configuration(
            format!("provider '{}' is disabled", provider.id),
            Some("enabled".to_string()),
        ));
    }
    parse_base_url(&provider.base_url, "baseUrl")?;
    if provider.kind == ProviderKind::OpenAiCompatibleSse && provider.bearer_token().is_none() {
        return Err(Error::configuration(
            format!("provider '{}' requires an API key", provider.id),
            Some("apiKey".to_string()),
        ));
    }
    Ok(())
}

/// Build the streaming chat request for `provider`.
pub fn build_chat_request(
    provider: &Provider,
    model_id: &str,
    history: &[WireMessage],
) -> Result<StreamRequest> {
    validate_provider(provider)?;
    let model_id = require_model(model_id)?;

    let (path, mode) = match provider.kind {
        ProviderKind::NativeNdjson => ("/api/chat", StreamMode::Ndjson),
        ProviderKind::OpenAiCompatibleSse => ("/chat/completions", StreamMode::Sse),
    };
    let url = endpoint(&provider.base_url, "baseUrl", path)?;
    let mut headers = stream_headers(mode);
    authorize(&mut headers, provider)?;

    let body = serde_json::to_value(ChatRequestBody {
        model: model_id,
        messages: history,
        stream: true,
        knowledge_base_id: None,
    })?;

    Ok(StreamRequest {
        request: RequestDescriptor {
            method: Method::POST,
            url,
            headers,
            body: Some(body),
        },
        mode,
    })
}

/// Build the streaming chat request that routes through the retrieval backend.
///
/// The backend performs retrieval server-side and answers in NDJSON, interleaving
/// a `sources` line with the content lines.
pub fn build_retrieval_chat_request(
    backend_url: &str,
    model_id: &str,
    history: &[WireMessage],
    knowledge_base_id: &str,
) -> Result<StreamRequest> {
    let model_id = require_model(model_id)?;
    let url = endpoint(backend_url, "retrieval.baseUrl", "/api/chat")?;
    let body = serde_json::to_value(ChatRequestBody {
        model: model_id,
        messages: history,
        stream: true,
        knowledge_base_id: Some(knowledge_base_id),
    })?;
    Ok(StreamRequest {
        request: RequestDescriptor {
            method: Method::POST,
            url,
            headers: stream_headers(StreamMode::Ndjson),
            body: Some(body),
        },
        mode: StreamMode::Ndjson,
    })
}

/// The liveness URL of the retrieval backend.
pub fn retrieval_health_url(backend_url: &str) -> Result<Url> {
    endpoint(backend_url, "retrieval.baseUrl", "/api/health")
}

/// Build the request that lists the models a provider serves.
pub fn build_model_list_request(provider: &Provider) -> Result<RequestDescriptor> {
    validate_provider(provider)?;
    let path = match provider.kind {
        ProviderKind::NativeNdjson => "/api/tags",
        ProviderKind::OpenAiCompatibleSse => "/models",
    };
    let url = endpoint(&provider.base_url, "baseUrl", path)?;
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    authorize(&mut headers, provider)?;
    Ok(RequestDescriptor {
        method: Method::GET,
        url,
        headers,
        body: None,
    })
}

/// Parse the body returned for [`build_model_list_request`].
pub fn parse_model_list(provider: &Provider, body: &str) -> Result<Vec<Model>> {
    let models = match provider.kind {
        ProviderKind::NativeNdjson => {
            let tags: TagsResponse = serde_json::from_str(body)?;
            tags.models
                .into_iter()
                .map(|m| Model {
                    id: m.name.clone(),
                    name: m.name,
                    provider_id: provider.id.clone(),
                    size: m.details.and_then(|d| d.parameter_size),
                })
                .collect()
        }
        ProviderKind::OpenAiCompatibleSse => {
            let listing: ModelsResponse = serde_json::from_str(body)?;
            listing
                .data
                .into_iter()
                .map(|m| Model {
                    id: m.id.clone(),
                    name: m.id,
                    provider_id: provider.id.clone(),
                    size: None,
                })
                .collect()
        }
    };
    Ok(models)
}

fn require_model(model_id: &str) -> Result<&str> {
    let model_id = model_id.trim();
    if model_id.is_empty() {
        return Err(Error::configuration(
            "no model selected",
            Some("model".to_string()),
        ));
    }
    Ok(model_id)
}

fn parse_base_url(raw: &str, param: &str) -> Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|err| {
        Error::configuration(
            format!("malformed base URL '{raw}': {err}"),
            Some(param.to_string()),
        )
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(Error::configuration(
            format!("base URL '{raw}' must be an http(s) URL"),
            Some(param.to_string()),
        ));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(Error::configuration(
            format!("base URL '{raw}' must not carry a query or fragment"),
            Some(param.to_string()),
        ));
    }
    Ok(url)
}

/// Append `path` to the path of the base URL.
pub(crate) fn endpoint(base: &str, param: &str, path: &str) -> Result<Url> {
    let mut url = parse_base_url(base, param)?;
    let joined = format!("{}{path}", url.path().trim_end_matches('/'));
    url.set_path(&joined);
    Ok(url)
}

fn stream_headers(mode: StreamMode) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    let accept = match mode {
        StreamMode::Ndjson => "application/x-ndjson",
        StreamMode::Sse => "text/event-stream",
    };
    headers.insert(header::ACCEPT, HeaderValue::from_static(accept));
    headers
}

fn authorize(headers: &mut HeaderMap, provider: &Provider) -> Result<()> {
    if let Some(token) = provider.bearer_token() {
        let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            Error::configuration(
                format!("API key of provider '{}' is not a valid header value", provider.id),
                Some("apiKey".to_string()),
            )
        })?;
        headers.insert(header::AUTHORIZATION, value);
    }
    Ok(())
}
