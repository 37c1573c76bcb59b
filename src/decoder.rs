//! Frame decoding for streaming chat responses.
//!
//! Backends answer a streaming chat request in one of two line-oriented formats:
//! newline-delimited JSON from the local model server, or server-sent events from
//! OpenAI-compatible endpoints.  This module turns either byte stream into the same
//! sequence of [`StreamEvent`]s.
//!
//! Lines are framed on raw bytes, so a chunk boundary may fall anywhere, including
//! inside a multi-byte character.  A line that is not valid UTF-8 or not valid JSON is
//! dropped and decoding carries on; a single bad line never ends a stream.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::codec::Decoder;

use crate::error::{Error, Result};
use crate::observability::{STREAM_BYTES, STREAM_EVENTS, STREAM_SKIPPED_LINES};
use crate::types::StreamEvent;

/// Marker that ends an SSE stream.
const SSE_DONE: &str = "[DONE]";

/// Response framing of a chat request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StreamMode {
    /// One JSON object per line: `{"message":{"content":..},"done":..}`.
    Ndjson,

    /// `data: {...}` lines carrying `choices[0].delta.content`, ended by `data: [DONE]`.
    Sse,
}

/// Incremental decoder for one response stream.
///
/// Bytes after the last newline stay in the buffer until more arrive.  Once a
/// [`StreamEvent::Done`] has been produced the decoder is finished and discards
/// everything else it is given.
#[derive(Debug)]
pub struct FrameDecoder {
    mode: StreamMode,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

impl FrameDecoder {
    /// Create a decoder for the given framing.
    pub fn new(mode: StreamMode) -> Self {
        Self {
            mode,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Returns true once the terminal event has been decoded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn push_line(&mut self, raw: &[u8]) {
        if self.finished {
            return;
        }
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(_) => {
                skip_line(self.mode, raw.len(), "invalid UTF-8");
                return;
            }
        };
        if line.is_empty() {
            return;
        }
        let events = match self.mode {
            StreamMode::Ndjson => parse_ndjson_line(line),
            StreamMode::Sse => parse_sse_line(line),
        };
        let Some(events) = events else {
            skip_line(self.mode, raw.len(), "not a JSON event");
            return;
        };
        for event in events {
            let terminal = event.is_terminal();
            self.pending.push_back(event);
            if terminal {
                self.finished = true;
                break;
            }
        }
    }
}

impl Decoder for FrameDecoder {
    type Item = StreamEvent;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.finished {
                src.clear();
                return Ok(None);
            }
            let Some(newline) = src.iter().position(|b| *b == b'\n') else {
                return Ok(None);
            };
            let line = src.split_to(newline + 1);
            self.push_line(&line[..newline]);
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<StreamEvent>> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        if !src.is_empty() {
            let tail = src.split();
            self.push_line(&tail);
        }
        Ok(self.pending.pop_front())
    }
}

fn skip_line(mode: StreamMode, len: usize, reason: &'static str) {
    STREAM_SKIPPED_LINES.click();
    tracing::debug!(?mode, bytes = len, reason, "dropping undecodable stream line");
}

/// Turn a response body into a stream of events.
///
/// The returned stream ends after [`StreamEvent::Done`], when the body ends, or right
/// after yielding a transport error.  It never looks past the bytes received so far.
///
/// ```
/// # use bytes::Bytes;
/// # use futures::{StreamExt, stream};
/// # use whalechat::{StreamEvent, StreamMode, decode_stream};
/// # tokio_test::block_on(async {
/// let body = stream::iter(vec![
///     Ok(Bytes::from_static(b"{\"message\":{\"content\":\"Hi\"}}\n{\"done\":")),
///     Ok(Bytes::from_static(b"true}\n")),
/// ]);
/// let events: Vec<_> = Box::pin(decode_stream(body, StreamMode::Ndjson))
///     .map(|event| event.unwrap())
///     .collect()
///     .await;
/// assert_eq!(events, vec![StreamEvent::Content("Hi".to_string()), StreamEvent::Done]);
/// # });
/// ```
pub fn decode_stream<S>(byte_stream: S, mode: StreamMode) -> impl Stream<Item = Result<StreamEvent>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let state = DecodeState {
        bytes: byte_stream,
        buffer: BytesMut::new(),
        decoder: FrameDecoder::new(mode),
        eof: false,
        failed: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.failed {
                return None;
            }

            // Drain whatever the buffer already holds before reading more.
            let decoded = if state.eof {
                state.decoder.decode_eof(&mut state.buffer)
            } else {
                state.decoder.decode(&mut state.buffer)
            };
            match decoded {
                Ok(Some(event)) => {
                    STREAM_EVENTS.click();
                    return Some((Ok(event), state));
                }
                Ok(None) if state.eof || state.decoder.is_finished() => return None,
                Ok(None) => {}
                Err(err) => {
                    state.failed = true;
                    return Some((Err(err), state));
                }
            }

            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    STREAM_BYTES.count(bytes.len() as u64);
                    state.buffer.extend_from_slice(&bytes);
                }
                Some(Err(err)) => {
                    state.failed = true;
                    return Some((Err(err), state));
                }
                None => state.eof = true,
            }
        }
    })
}

struct DecodeState<S> {
    bytes: S,
    buffer: BytesMut,
    decoder: FrameDecoder,
    eof: bool,
    failed: bool,
}

///////////////////////////////////////////// NDJSON ////////////////////////////////////////////

#[derive(Deserialize)]
struct NdjsonChunk {
    #[serde(default)]
    message: Option<NdjsonMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    sources: Option<Vec<Value>>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct NdjsonMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Parse one NDJSON line.  `None` means the line is not a JSON object.
fn parse_ndjson_line(line: &str) -> Option<Vec<StreamEvent>> {
    let chunk: NdjsonChunk = serde_json::from_str(line).ok()?;
    let mut events = Vec::new();
    if let Some(sources) = chunk.sources {
        events.push(StreamEvent::Sources(
            sources.iter().filter_map(source_name).collect(),
        ));
    }
    if let Some(content) = chunk.message.and_then(|m| m.content)
        && !content.is_empty()
    {
        events.push(StreamEvent::Content(content));
    }
    if let Some(error) = chunk.error.as_ref().and_then(error_message) {
        events.push(StreamEvent::Error(error));
    }
    if chunk.done {
        events.push(StreamEvent::Done);
    }
    Some(events)
}

fn source_name(value: &Value) -> Option<String> {
    match value {
        Value::String(name) => Some(name.clone()),
        Value::Object(map) => ["name", "source", "document"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

fn error_message(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(message) => Some(message.clone()),
        Value::Object(map) => Some(
            map.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
        ),
        other => Some(other.to_string()),
    }
}

////////////////////////////////////////////// SSE //////////////////////////////////////////////

#[derive(Deserialize)]
struct SseChunk {
    #[serde(default)]
    choices: Vec<SseChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct SseChoice {
    #[serde(default)]
    delta: Option<SseDelta>,
}

#[derive(Deserialize)]
struct SseDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Parse one SSE line.  `None` means the payload is neither the done marker nor JSON.
fn parse_sse_line(line: &str) -> Option<Vec<StreamEvent>> {
    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest).trim(),
        None => line,
    };
    if payload.is_empty() {
        return Some(Vec::new());
    }
    if payload == SSE_DONE {
        return Some(vec![StreamEvent::Done]);
    }
    let chunk: SseChunk = serde_json::from_str(payload).ok()?;
    let mut events = Vec::new();
    if let Some(content) = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        && !content.is_empty()
    {
        events.push(StreamEvent::Content(content));
    }
    if let Some(error) = chunk.error.as_ref().and_then(error_message) {
        events.push(StreamEvent::Error(error));
    }
    Some(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    async fn collect(chunks: Vec<Vec<u8>>, mode: StreamMode) -> Vec<StreamEvent> {
        let bytes = stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))));
        let events = decode_stream(bytes, mode);
        futures::pin_mut!(events);
        let mut out = Vec::new();
        while let Some(event) = events.next().await {
            out.push(event.unwrap());
        }
        out
    }

    fn content(text: &str) -> StreamEvent {
        StreamEvent::Content(text.to_string())
    }

    const NDJSON: &str = concat!(
        "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"lo 鲸\"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
    );

    #[tokio::test]
    async fn ndjson_single_chunk() {
        let events = collect(vec![NDJSON.as_bytes().to_vec()], StreamMode::Ndjson).await;
        assert_eq!(
            events,
            vec![content("Hel"), content("lo 鲸"), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn ndjson_fragmentation_at_every_byte() {
        let bytes = NDJSON.as_bytes();
        let expected = collect(vec![bytes.to_vec()], StreamMode::Ndjson).await;
        for split in 0..=bytes.len() {
            let chunks = vec![bytes[..split].to_vec(), bytes[split..].to_vec()];
            let events = collect(chunks, StreamMode::Ndjson).await;
            assert_eq!(events, expected, "split at byte {split}");
        }
        let singles = bytes.iter().map(|b| vec![*b]).collect();
        assert_eq!(collect(singles, StreamMode::Ndjson).await, expected);
    }

    #[test]
    fn partial_line_is_retained() {
        let mut decoder = FrameDecoder::new(StreamMode::Ndjson);
        let mut buffer = BytesMut::from(&b"{\"message\":{\"content\":\"par"[..]);
        assert_eq!(decoder.decode(&mut buffer).unwrap(), None);
        assert_eq!(buffer.len(), 26);

        buffer.extend_from_slice(b"tial\"}}\n");
        assert_eq!(decoder.decode(&mut buffer).unwrap(), Some(content("partial")));
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn ndjson_sources_do_not_close_stream() {
        let body = concat!(
            "{\"sources\":[\"engine.txt\",{\"name\":\"manual.md\"}]}\n",
            "{\"message\":{\"content\":\"Check the oil.\"}}\n",
            "{\"done\":true}\n",
        );
        let events = collect(vec![body.as_bytes().to_vec()], StreamMode::Ndjson).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Sources(vec!["engine.txt".to_string(), "manual.md".to_string()]),
                content("Check the oil."),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn malformed_line_is_dropped() {
        let body = concat!(
            "{\"message\":{\"content\":\"a\"}}\n",
            "{\"message\":{\"content\":\n",
            "not json at all\n",
            "{\"message\":{\"content\":\"b\"}}\n",
        );
        let events = collect(vec![body.as_bytes().to_vec()], StreamMode::Ndjson).await;
        assert_eq!(events, vec![content("a"), content("b")]);
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_dropped() {
        let mut body = b"{\"message\":{\"content\":\"".to_vec();
        body.extend_from_slice(&[0xff, 0xfe]);
        body.extend_from_slice(b"\"}}\n{\"message\":{\"content\":\"ok\"}}\n");
        let events = collect(vec![body], StreamMode::Ndjson).await;
        assert_eq!(events, vec![content("ok")]);
    }

    #[tokio::test]
    async fn ndjson_in_band_error() {
        let body = "{\"error\":\"model 'nope' not found\"}\n";
        let events = collect(vec![body.as_bytes().to_vec()], StreamMode::Ndjson).await;
        assert_eq!(
            events,
            vec![StreamEvent::Error("model 'nope' not found".to_string())]
        );
    }

    #[tokio::test]
    async fn trailing_line_without_newline_is_parsed_at_eof() {
        let body = "{\"message\":{\"content\":\"a\"}}\n{\"message\":{\"content\":\"b\"}}";
        let events = collect(vec![body.as_bytes().to_vec()], StreamMode::Ndjson).await;
        assert_eq!(events, vec![content("a"), content("b")]);
    }

    #[tokio::test]
    async fn ndjson_stops_after_done() {
        let body = concat!(
            "{\"message\":{\"content\":\"a\"},\"done\":true}\n",
            "{\"message\":{\"content\":\"late\"}}\n",
        );
        let events = collect(vec![body.as_bytes().to_vec()], StreamMode::Ndjson).await;
        assert_eq!(events, vec![content("a"), StreamEvent::Done]);
    }

    fn sse_line(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"index": 0, "delta": {"content": text}}]})
        )
    }

    #[tokio::test]
    async fn sse_content_and_done() {
        let body = format!("{}{}data: [DONE]\n\n", sse_line("Hi"), sse_line(" there"));
        let events = collect(vec![body.into_bytes()], StreamMode::Sse).await;
        assert_eq!(
            events,
            vec![content("Hi"), content(" there"), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn sse_done_is_final_even_with_more_bytes() {
        let first = format!("{}data: [DONE]\n\n", sse_line("one"));
        let second = format!("{}data: [DONE]\n\n", sse_line("two"));
        let events = collect(
            vec![first.into_bytes(), second.into_bytes()],
            StreamMode::Sse,
        )
        .await;
        assert_eq!(events, vec![content("one"), StreamEvent::Done]);
        assert_eq!(
            events.iter().filter(|e| e.is_terminal()).count(),
            1,
            "exactly one done event"
        );
    }

    #[tokio::test]
    async fn sse_tolerates_crlf_and_missing_space() {
        let body = concat!(
            ": keep-alive\r\n",
            "data:{\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\r\n",
            "data:{\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\r\n",
            "\r\n",
            "data: [DONE]\r\n",
        );
        let events = collect(vec![body.as_bytes().to_vec()], StreamMode::Sse).await;
        assert_eq!(events, vec![content("x"), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn sse_in_band_error() {
        let body = "data: {\"error\":{\"message\":\"quota exceeded\",\"type\":\"insufficient_quota\"}}\n";
        let events = collect(vec![body.as_bytes().to_vec()], StreamMode::Sse).await;
        assert_eq!(events, vec![StreamEvent::Error("quota exceeded".to_string())]);
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"{\"message\":{\"content\":\"a\"}}\n")),
            Err(Error::streaming("connection reset", None)),
            Ok(Bytes::from_static(b"{\"message\":{\"content\":\"b\"}}\n")),
        ];
        let events = decode_stream(stream::iter(chunks), StreamMode::Ndjson);
        futures::pin_mut!(events);

        assert_eq!(events.next().await.unwrap().unwrap(), content("a"));
        assert!(events.next().await.unwrap().is_err());
        assert!(events.next().await.is_none());
    }
}
