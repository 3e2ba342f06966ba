//! Server-sent event plumbing: a bounded line reader for upstream bodies and
//! the frame formatters for output.

use crate::core::{AppError, Result};
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Initial capacity of the per-stream line buffer.
pub const INITIAL_LINE_CAPACITY: usize = 64 * 1024;
/// A single line may not grow beyond this.
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Literal terminal marker of chat-completion streams.
pub const DONE_MARKER: &str = "[DONE]";

// ============================================================================
// Line reader
// ============================================================================

/// Splits an upstream byte stream into lines without ever holding more than
/// one (bounded) line plus one network chunk.
pub struct LineReader {
    body: BoxStream<'static, Result<Bytes>>,
    buffer: BytesMut,
    /// Bytes of `buffer` already known to contain no newline
    scanned: usize,
    max_line: usize,
    exhausted: bool,
}

impl LineReader {
    pub fn new(body: BoxStream<'static, Result<Bytes>>) -> Self {
        Self::with_limit(body, MAX_LINE_BYTES)
    }

    pub fn with_limit(body: BoxStream<'static, Result<Bytes>>, max_line: usize) -> Self {
        Self {
            body,
            buffer: BytesMut::with_capacity(INITIAL_LINE_CAPACITY.min(max_line)),
            scanned: 0,
            max_line,
            exhausted: false,
        }
    }

    /// Next line without its terminator, or `None` at end of body.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
                let end = self.scanned + offset;
                let raw = self.buffer.split_to(end + 1);
                self.scanned = 0;
                return Ok(Some(decode_line(&raw[..end])));
            }
            self.scanned = self.buffer.len();

            if self.buffer.len() > self.max_line {
                return Err(AppError::StreamLineTooLong(self.max_line));
            }

            if self.exhausted {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let raw = self.buffer.split();
                self.scanned = 0;
                return Ok(Some(decode_line(&raw)));
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e),
                None => self.exhausted = true,
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

// ============================================================================
// Line classification
// ============================================================================

/// One classified SSE line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// `event: <name>`
    Event(String),
    /// `data: <payload>`
    Data(String),
    /// Blank line ending an event block.
    Boundary,
    /// Comments, `id:`, `retry:` and anything else.
    Ignored,
}

impl SseLine {
    pub fn parse(line: &str) -> Self {
        if line.is_empty() {
            return SseLine::Boundary;
        }
        if line.starts_with(':') {
            return SseLine::Ignored;
        }
        match line.split_once(':') {
            Some(("event", value)) => SseLine::Event(strip_leading_space(value).to_string()),
            Some(("data", value)) => SseLine::Data(strip_leading_space(value).to_string()),
            _ => SseLine::Ignored,
        }
    }
}

fn strip_leading_space(value: &str) -> &str {
    value.strip_prefix(' ').unwrap_or(value)
}

/// Decode a `data:` payload into a `type`-tagged event. When the payload has
/// no `type`, the preceding `event:` name is used instead.
pub(crate) fn decode_typed<T: DeserializeOwned>(event_name: Option<&str>, mut data: Value) -> Option<T> {
    if let (Some(name), Some(obj)) = (event_name, data.as_object_mut()) {
        obj.entry("type").or_insert_with(|| Value::String(name.to_string()));
    }
    match serde_json::from_value(data) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping undecodable stream payload");
            None
        }
    }
}

// ============================================================================
// Frame formatting
// ============================================================================

/// Format a named SSE event.
pub fn format_sse_event(event_type: &str, data: &Value) -> String {
    format!(
        "event: {}\ndata: {}\n\n",
        event_type,
        serde_json::to_string(data).unwrap_or_default()
    )
}

/// Format a data-only SSE event.
pub fn format_sse_data(data: &Value) -> String {
    format!("data: {}\n\n", serde_json::to_string(data).unwrap_or_default())
}

/// Format the SSE done marker.
pub fn format_sse_done() -> String {
    format!("data: {}\n\n", DONE_MARKER)
}
