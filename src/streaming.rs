//! Streaming chat response parser
//!
//! Consumes an OpenAI-compatible server-sent-events body of `data: {json}`
//! lines terminated by `data: [DONE]`, accumulating the assistant reply and
//! any web-search citations the provider attaches.
//!
//! Chunks may split anywhere, including inside a line or inside a
//! multi-byte UTF-8 sequence. Incomplete lines are carried over in a
//! buffer and incomplete byte sequences are carried over in the decoder.

use crate::error::{OpenChatError, Result};
use crate::types::{Citation, CitationMap};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Receives incremental updates while a stream is parsed
pub trait StreamingCallbacks {
    /// Called after each content delta with the full reply so far
    fn on_content(&mut self, _content: &str) {}

    /// Called whenever the citation map changes
    fn on_citations(&mut self, _citations: &CitationMap) {}
}

/// Callbacks that ignore every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl StreamingCallbacks for NoopCallbacks {}

/// Final state of a parsed stream
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamingResult {
    /// Accumulated reply text
    pub content: String,
    /// Citations keyed by zero-based index
    pub citations: CitationMap,
    /// True when the stream was cancelled before it ended
    pub aborted: bool,
}

/// Parse an SSE chat completion stream
///
/// # Arguments
///
/// * `byte_stream` - Response body as a stream of byte chunks
/// * `callbacks` - Receives cumulative content and citation updates
/// * `cancel` - Optional token; once cancelled the pending read is dropped
///   and the content accumulated so far is returned
///
/// # Returns
///
/// Returns the accumulated content and citations.
///
/// # Errors
///
/// Returns `OpenChatError::Stream` if the underlying body fails mid-read.
/// Malformed event lines are logged and skipped.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use openchat::streaming::{parse_streaming_response, NoopCallbacks};
///
/// # tokio_test::block_on(async {
/// let body = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(
///     "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n",
/// ))]);
/// let result = parse_streaming_response(body, &mut NoopCallbacks, None).await.unwrap();
/// assert_eq!(result.content, "Hi");
/// # });
/// ```
pub async fn parse_streaming_response<S, E, C>(
    byte_stream: S,
    callbacks: &mut C,
    cancel: Option<&CancellationToken>,
) -> Result<StreamingResult>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: std::fmt::Display,
    C: StreamingCallbacks + ?Sized,
{
    tokio::pin!(byte_stream);

    let mut decoder = Utf8Decoder::default();
    let mut buffer = String::new();
    let mut result = StreamingResult::default();

    loop {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            result.aborted = true;
            break;
        }

        let next = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    result.aborted = true;
                    break;
                }
                item = byte_stream.next() => item,
            },
            None => byte_stream.next().await,
        };

        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk
            .map_err(|e| OpenChatError::Stream(format!("Failed to read response body: {}", e)))?;

        buffer.push_str(&decoder.decode(&chunk));

        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            process_line(&line, &mut result, &mut *callbacks);
        }
    }

    buffer.push_str(&decoder.finish());
    if !buffer.trim().is_empty() {
        let preview: String = buffer.chars().take(100).collect();
        tracing::warn!("Stream ended with incomplete data in buffer: {}", preview);
    }

    if result.aborted {
        tracing::debug!(
            chars = result.content.len(),
            "Stream cancelled, keeping partial content"
        );
    }

    Ok(result)
}

fn process_line<C>(line: &str, result: &mut StreamingResult, callbacks: &mut C)
where
    C: StreamingCallbacks + ?Sized,
{
    let trimmed = line.trim();
    let Some(data) = trimmed.strip_prefix(DATA_PREFIX) else {
        return;
    };
    if data == DONE_SENTINEL {
        return;
    }

    let parsed: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Failed to parse streaming data: {} ({})", data, e);
            return;
        }
    };

    if let Some(content) = parsed
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
    {
        result.content.push_str(content);
        callbacks.on_content(&result.content);
    }

    if let Some(raw) = parsed
        .pointer("/venice_parameters/web_search_citations")
        .and_then(Value::as_array)
    {
        normalize_citations(raw, &mut result.citations);
        callbacks.on_citations(&result.citations);
    }
}

/// Normalize provider citation entries into `target`, keyed by index
///
/// Missing fields fall back to the entry's `metadata`: `url` to
/// `metadata.url`, `title` to `metadata.title` then `"Source N"`, and
/// `snippet` to `description` then an empty string. When the entry has no
/// `metadata` object, the raw entry is kept as metadata.
pub fn normalize_citations(raw: &[Value], target: &mut CitationMap) {
    for (index, entry) in raw.iter().enumerate() {
        let metadata = entry.get("metadata").filter(|m| m.is_object());

        let url = non_empty_str(entry, "url")
            .or_else(|| metadata.and_then(|m| non_empty_str(m, "url")))
            .map(str::to_string);
        let title = non_empty_str(entry, "title")
            .or_else(|| metadata.and_then(|m| non_empty_str(m, "title")))
            .map(str::to_string)
            .unwrap_or_else(|| format!("Source {}", index + 1));
        let snippet = non_empty_str(entry, "snippet")
            .or_else(|| non_empty_str(entry, "description"))
            .unwrap_or_default()
            .to_string();

        target.insert(
            index.to_string(),
            Citation {
                id: index.to_string(),
                url,
                title: Some(title),
                snippet: Some(snippet),
                metadata: Some(metadata.cloned().unwrap_or_else(|| entry.clone())),
            },
        );
    }
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Incremental UTF-8 decoder that carries incomplete sequences between chunks
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(rest) => {
                    out.push_str(rest);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        out
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
