//! Server-Sent Events (SSE) parsing for upstream streaming responses
//!
//! Bytes are buffered until a full event block is available, so multi-byte
//! UTF-8 sequences split across network chunks decode correctly.

use bytes::BytesMut;
use futures::{stream, Stream, StreamExt};
use tracing::{debug, warn};

use crate::llm::{LLMError, LLMResult};

/// SSE event structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// The OpenAI-style end-of-stream sentinel
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Incremental parser turning byte chunks into SSE events
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: BytesMut,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completes
    pub fn parse_chunk(&mut self, chunk: &[u8]) -> LLMResult<Vec<SseEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, separator_len)) = find_event_boundary(&self.buffer) {
            let block = self.buffer.split_to(end + separator_len);
            let text = std::str::from_utf8(&block[..end])
                .map_err(|e| LLMError::Parse(format!("Invalid UTF-8 in SSE stream: {}", e)))?;

            if let Some(event) = parse_event_block(text) {
                events.push(event);
            }
        }

        Ok(events)
    }
}

/// Position and length of the first blank-line separator
fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, 4));

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Parse a single event block. Blocks with only comments yield `None`.
fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut event_type = None;
    let mut data_lines = Vec::new();
    let mut id = None;

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => event_type = Some(value.to_string()),
            "data" => data_lines.push(value.to_string()),
            "id" => id = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() && event_type.is_none() {
        return None;
    }

    Some(SseEvent {
        event_type,
        data: data_lines.join("\n"),
        id,
    })
}

/// Turn an upstream byte stream into a stream of SSE events
pub fn sse_events<S, B, E>(byte_stream: S) -> impl Stream<Item = LLMResult<SseEvent>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let mut parser = SseParser::new();

    byte_stream
        .map(move |chunk| match chunk {
            Ok(bytes) => match parser.parse_chunk(bytes.as_ref()) {
                Ok(events) => {
                    debug!("Parsed {} SSE events", events.len());
                    events.into_iter().map(Ok).collect::<Vec<_>>()
                }
                Err(e) => vec![Err(e)],
            },
            Err(e) => {
                warn!("Upstream stream error: {}", e);
                vec![Err(LLMError::Network(e.to_string()))]
            }
        })
        .flat_map(stream::iter)
}

/// Convert a reqwest response body into an SSE event stream
pub fn response_to_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = LLMResult<SseEvent>> + Send {
    sse_events(response.bytes_stream())
}
