use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use futures::stream::StreamExt;
use reqwest::{Client as ReqwestClient, Response};
use serde::Deserialize;
use url::Url;

use crate::adapter::{RequestDescriptor, build_model_list_request, parse_model_list};
use crate::error::{Error, Result};
use crate::observability::{
    TRANSPORT_ERRORS, TRANSPORT_REQUESTS, TRANSPORT_RETRIES, TRANSPORT_RETRY_BACKOFF,
};
use crate::types::{Model, Provider};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(4);

/// A response body as it arrives.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// The network seam of the chat engine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return its body once the response status is known good.
    async fn open_stream(&self, request: &RequestDescriptor) -> Result<ByteStream>;

    /// Returns true if `url` answers a GET with a success status.
    async fn probe(&self, url: &Url) -> bool;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn open_stream(&self, request: &RequestDescriptor) -> Result<ByteStream> {
        self.as_ref().open_stream(request).await
    }

    async fn probe(&self, url: &Url) -> bool {
        self.as_ref().probe(url).await
    }
}

/// Timeouts and retry policy of an [`HttpClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Bound on establishing a connection.
    pub connect_timeout: Duration,

    /// Bound on receiving response headers, and on whole non-streaming requests.
    pub request_timeout: Duration,

    /// Bound on health probes.
    pub probe_timeout: Duration,

    /// Extra attempts made for retryable failures before a stream opens.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_backoff: Duration,

    /// Upper bound on the delay between retries.
    pub max_backoff: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl ClientOptions {
    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// HTTP transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    options: ClientOptions,
}

impl HttpClient {
    /// Create a client with default options.
    pub fn new() -> Result<Self> {
        Self::with_options(ClientOptions::default())
    }

    /// Create a client with custom timeouts and retry policy.
    pub fn with_options(options: ClientOptions) -> Result<Self> {
        let client = ReqwestClient::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self { client, options })
    }

    /// The options this client was built with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub(crate) fn reqwest(&self) -> &ReqwestClient {
        &self.client
    }

    /// Send a request and read the whole body as text.
    pub async fn fetch_text(&self, request: &RequestDescriptor) -> Result<String> {
        let response = self.send_with_retries(request).await?;
        let body = tokio::time::timeout(self.options.request_timeout, response.text())
            .await
            .map_err(|_| {
                Error::timeout(
                    format!("reading {} timed out", request.url),
                    Some(self.options.request_timeout.as_secs_f64()),
                )
            })??;
        Ok(body)
    }

    /// List the models `provider` serves.
    pub async fn list_models(&self, provider: &Provider) -> Result<Vec<Model>> {
        let request = build_model_list_request(provider)?;
        let body = self.fetch_text(&request).await?;
        parse_model_list(provider, &body)
    }

    async fn send_with_retries(&self, request: &RequestDescriptor) -> Result<Response> {
        let mut attempt = 0;
        loop {
            match self.send_once(request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.options.max_retries => {
                    let backoff = self.options.backoff_for(attempt);
                    TRANSPORT_RETRIES.click();
                    TRANSPORT_RETRY_BACKOFF.add(backoff.as_secs_f64());
                    tracing::warn!(
                        url = %request.url,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying request"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    TRANSPORT_ERRORS.click();
                    return Err(err);
                }
            }
        }
    }

    async fn send_once(&self, request: &RequestDescriptor) -> Result<Response> {
        TRANSPORT_REQUESTS.click();
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = tokio::time::timeout(self.options.request_timeout, builder.send())
            .await
            .map_err(|_| {
                Error::timeout(
                    format!("no response from {}", request.url),
                    Some(self.options.request_timeout.as_secs_f64()),
                )
            })??;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }
        Ok(response)
    }

    /// Turn a non-2xx response into an error carrying the backend's message.
    pub(crate) async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();
        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {e}"),
                    Some(Box::new(e)),
                );
            }
        };
        let message = error_message(&error_body);
        match status_code {
            408 => Error::timeout(message, None),
            _ => Error::api(status_code, message),
        }
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn open_stream(&self, request: &RequestDescriptor) -> Result<ByteStream> {
        let response = self.send_with_retries(request).await?;
        let body = response.bytes_stream().map(|chunk| chunk.map_err(Error::from));
        Ok(Box::pin(body))
    }

    async fn probe(&self, url: &Url) -> bool {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.options.probe_timeout)
            .send()
            .await;
        match response {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(%url, error = %err, "health probe failed");
                false
            }
        }
    }
}

/// Extract a readable message from an error body.
///
/// Both `{"error": "..."}` and `{"error": {"message": "..."}}` are understood.  Anything
/// else is reported verbatim.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorResponse {
        error: Option<ErrorDetail>,
        detail: Option<String>,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ErrorDetail {
        Text(String),
        Object { message: Option<String> },
    }

    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();
    let message = parsed.and_then(|e| match e.error {
        Some(ErrorDetail::Text(text)) => Some(text),
        Some(ErrorDetail::Object { message }) => message,
        None => e.detail,
    });
    match message {
        Some(message) => message,
        None if body.trim().is_empty() => "empty error response".to_string(),
        None => body.trim().to_string(),
    }
}
