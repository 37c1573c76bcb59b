//! The reqwest transport against a loopback HTTP server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use whalechat::adapter::build_chat_request;
use whalechat::{
    ClientOptions, CompletionReason, Document, HttpClient, NoopObserver, Orchestrator, Provider,
    ProviderKind, RetrievalClient, SendRequest, Transport, WireMessage,
};

/// Serves one canned response per connection, in order, and records each request.
struct CannedServer {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl CannedServer {
    async fn start(responses: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut socket).await;
                seen.lock().unwrap().push(request);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        Self { base_url, requests }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= end + 4 + length {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn streaming_response(content_type: &str, body: &str) -> String {
    format!("HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n{body}")
}

fn fast_retries() -> ClientOptions {
    ClientOptions {
        max_retries: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        ..ClientOptions::default()
    }
}

fn local_at(base_url: &str) -> Provider {
    Provider::new("local", ProviderKind::NativeNdjson, base_url)
}

#[tokio::test]
async fn streams_a_chat_end_to_end() {
    let body = concat!(
        "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"}}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":true}\n",
    );
    let server = CannedServer::start(vec![streaming_response("application/x-ndjson", body)]).await;
    let http = HttpClient::with_options(fast_retries()).unwrap();
    let orch = Orchestrator::new(http, vec![local_at(&server.base_url)]);

    let outcome = orch
        .send(SendRequest::new("hi", "llama3", "local"), &mut NoopObserver)
        .await
        .unwrap();

    assert_eq!(outcome.reason(), Some(CompletionReason::Done));
    assert_eq!(orch.session(&outcome.session_id).unwrap().messages[1].content, "Hello");
    let requests = server.requests();
    assert!(requests[0].starts_with("POST /api/chat HTTP/1.1"));
    assert!(requests[0].contains("\"stream\":true"));
    assert!(requests[0].contains("\"model\":\"llama3\""));
}

#[tokio::test]
async fn retries_overloaded_server_before_streaming() {
    let server = CannedServer::start(vec![
        response("503 Service Unavailable", "application/json", "{\"error\":\"busy\"}"),
        streaming_response(
            "application/x-ndjson",
            "{\"message\":{\"content\":\"ok\"},\"done\":true}\n",
        ),
    ])
    .await;
    let http = HttpClient::with_options(fast_retries()).unwrap();
    let history = vec![WireMessage::user("hi")];
    let request = build_chat_request(&local_at(&server.base_url), "llama3", &history).unwrap();

    let mut body = http.open_stream(&request.request).await.unwrap();
    let mut text = Vec::new();
    while let Some(chunk) = body.next().await {
        text.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(String::from_utf8(text).unwrap(), "{\"message\":{\"content\":\"ok\"},\"done\":true}\n");
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = CannedServer::start(vec![response(
        "404 Not Found",
        "application/json",
        "{\"error\":\"model 'nope' not found\"}",
    )])
    .await;
    let http = HttpClient::with_options(fast_retries()).unwrap();
    let orch = Orchestrator::new(http, vec![local_at(&server.base_url)]);

    let outcome = orch
        .send(SendRequest::new("hi", "nope", "local"), &mut NoopObserver)
        .await
        .unwrap();

    let err = outcome.error().unwrap();
    assert_eq!(err.status_code(), Some(404));
    assert!(err.to_string().contains("model 'nope' not found"));
    assert_eq!(server.requests().len(), 1);
    let session = orch.session(&outcome.session_id).unwrap();
    assert_eq!(session.messages[1].content, "");
}

#[tokio::test]
async fn refused_connection_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let options = ClientOptions {
        max_retries: 0,
        ..ClientOptions::default()
    };
    let orch = Orchestrator::new(HttpClient::with_options(options).unwrap(), vec![local_at(&base_url)]);

    let outcome = orch
        .send(SendRequest::new("hi", "llama3", "local"), &mut NoopObserver)
        .await
        .unwrap();
    assert!(outcome.error().unwrap().is_transport());
}

#[tokio::test]
async fn lists_installed_models() {
    let tags = r#"{"models":[{"name":"llama3:8b","details":{"parameter_size":"8.0B"}},{"name":"qwen2:7b"}]}"#;
    let server = CannedServer::start(vec![response("200 OK", "application/json", tags)]).await;
    let http = HttpClient::new().unwrap();

    let models = http.list_models(&local_at(&server.base_url)).await.unwrap();

    let names: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(names, vec!["llama3:8b", "qwen2:7b"]);
    assert!(server.requests()[0].starts_with("GET /api/tags HTTP/1.1"));
}

#[tokio::test]
async fn probe_reports_health() {
    let server = CannedServer::start(vec![
        response("200 OK", "application/json", "{\"status\":\"ok\"}"),
        response("500 Internal Server Error", "text/plain", "down"),
    ])
    .await;
    let retrieval = RetrievalClient::new(HttpClient::new().unwrap(), &server.base_url).unwrap();

    assert!(retrieval.health().await);
    assert!(!retrieval.health().await);
    assert!(server.requests()[0].starts_with("GET /api/health HTTP/1.1"));
}

#[tokio::test]
async fn rag_query_and_document_sync() {
    let answer = r#"{"answer":"Check the oil.","docs":[{"document":"The engine needs oil."}],"status":"success"}"#;
    let server = CannedServer::start(vec![
        response("200 OK", "application/json", answer),
        response("200 OK", "application/json", "{\"status\":\"stored\"}"),
    ])
    .await;
    let retrieval = RetrievalClient::new(HttpClient::new().unwrap(), &server.base_url).unwrap();

    let rag = retrieval.query("engine oil", 3).await.unwrap();
    assert_eq!(rag.answer, "Check the oil.");
    assert_eq!(rag.docs.len(), 1);
    assert_eq!(rag.status, "success");

    let stored = retrieval
        .sync_document("kb-1", &Document::new("engine.txt", "The engine needs oil."))
        .await
        .unwrap();
    assert_eq!(stored["status"], "stored");

    let requests = server.requests();
    assert!(requests[0].starts_with("POST /api/rag/query HTTP/1.1"));
    assert!(requests[0].contains("\"top_k\":3"));
    assert!(requests[1].starts_with("POST /api/documents HTTP/1.1"));
    assert!(requests[1].contains("name=\"kb_id\""));
    assert!(requests[1].contains("engine.txt"));
}
