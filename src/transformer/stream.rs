//! Streaming transcoder.
//!
//! Upstream SSE lines are decoded into [`UpstreamEvent`]s, folded through a
//! per-call [`StreamState`] into dialect-neutral [`Frame`]s, and rendered by a
//! [`FrameEncoder`] for the caller's dialect. The whole pipeline runs inside
//! one `async_stream` generator owned by the response body, so dropping the
//! body (client disconnect) drops the upstream reader as well.

use super::sse::{format_sse_data, format_sse_done, format_sse_event, LineReader, SseLine, DONE_MARKER};
use super::{anthropic, openai, response_api, unix_now, Dialect, StopReason, TokenUsage, TranscodeContext};
use crate::api::upstream::UpstreamResult;
use crate::core::metrics::get_metrics;
use crate::services::redaction::{FragmentMode, RedactionPipeline};
use crate::services::sanitizer::{sanitize, stream_interrupted, SanitizedError};
use crate::services::usage::UsageSink;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

/// Output of the transcoder: one SSE frame per item.
pub type FrameStream = BoxStream<'static, Result<Bytes, Infallible>>;

// ============================================================================
// Upstream events
// ============================================================================

/// Dialect-neutral view of one upstream stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// Upstream announced a message (carries its id when known).
    Begin { id: Option<String> },
    Text(String),
    Thinking(String),
    /// A tool call appeared or grew. `index` is the upstream's own index.
    ToolCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    /// Token counters; absent fields leave the previous value untouched.
    Usage {
        input_tokens: Option<u64>,
        output_tokens: Option<u64>,
        cache_creation_input_tokens: Option<u64>,
        cache_read_input_tokens: Option<u64>,
    },
    Stop(StopReason),
    Done,
    Failed(Value),
}

/// Decode one `data:` payload of the given source dialect.
///
/// Undecodable payloads are logged at debug level and yield nothing.
pub fn decode_upstream(source: Dialect, event_name: Option<&str>, data: &str) -> Vec<UpstreamEvent> {
    let data = data.trim();
    if data == DONE_MARKER {
        return vec![UpstreamEvent::Done];
    }
    if data.is_empty() {
        return vec![];
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, dialect = %source, "Skipping undecodable stream data line");
            return vec![];
        }
    };

    match source {
        Dialect::Messages => {
            anthropic::decode_stream_event(event_name, value).map(anthropic::StreamEvent::into_upstream_events)
        }
        // Chat upstreams report mid-stream failures as a bare error object.
        Dialect::ChatCompletions if !openai::has_choices(&value) && value.get("error").is_some() => {
            Some(vec![UpstreamEvent::Failed(value["error"].clone())])
        }
        Dialect::ChatCompletions => openai::decode_chunk(value).map(openai::ChatChunk::into_upstream_events),
        Dialect::Responses if openai::has_choices(&value) => {
            openai::decode_chunk(value).map(openai::ChatChunk::into_upstream_events)
        }
        Dialect::Responses => response_api::decode_stream_event(event_name, value)
            .map(response_api::ResponseStreamEvent::into_upstream_events),
    }
    .unwrap_or_default()
}

// ============================================================================
// Frames
// ============================================================================

/// Kind of an output content block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Thinking,
    ToolUse {
        /// Ordinal of the call among this message's tool calls
        tool_index: usize,
        id: String,
        name: String,
    },
}

/// One dialect-neutral output frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Start { message_id: String, usage: TokenUsage },
    BlockOpen { index: usize, block: BlockKind },
    TextDelta { index: usize, text: String },
    ThinkingDelta { index: usize, thinking: String },
    ToolCallDelta { index: usize, tool_index: usize, arguments: String },
    BlockClose { index: usize },
    Finish { stop_reason: StopReason, usage: TokenUsage },
    Close,
    Error(Value),
}

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    AwaitingFirstEvent,
    Streaming,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    Thinking,
}

#[derive(Debug, Clone)]
struct ToolCallState {
    ordinal: usize,
    block: usize,
    arguments: String,
}

/// Per-call transcoding state. Owned by the generator, never shared.
///
/// At most one text or thinking block is open at a time. Tool-use blocks stay
/// open until the terminal sequence, because chat upstreams may interleave
/// argument fragments of several calls.
#[derive(Debug)]
pub struct StreamState {
    source: Dialect,
    target: Dialect,
    phase: StreamPhase,
    message_id: String,
    usage: TokenUsage,
    stop_reason: Option<StopReason>,
    next_block: usize,
    open: Option<(usize, OpenBlock)>,
    tool_calls: BTreeMap<usize, ToolCallState>,
}

impl StreamState {
    pub fn new(source: Dialect, target: Dialect) -> Self {
        Self {
            source,
            target,
            phase: StreamPhase::AwaitingFirstEvent,
            message_id: String::new(),
            usage: TokenUsage::default(),
            stop_reason: None,
            next_block: 0,
            open: None,
            tool_calls: BTreeMap::new(),
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn has_started(&self) -> bool {
        self.phase != StreamPhase::AwaitingFirstEvent
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == StreamPhase::Terminated
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Accumulated arguments of the tool call with the given upstream index.
    pub fn tool_arguments(&self, index: usize) -> Option<&str> {
        self.tool_calls.get(&index).map(|t| t.arguments.as_str())
    }

    /// Fold a batch of upstream events into output frames.
    pub fn apply_all(&mut self, events: Vec<UpstreamEvent>, pipeline: &RedactionPipeline) -> Vec<Frame> {
        let mut frames = Vec::new();
        for event in events {
            self.apply(event, pipeline, &mut frames);
        }
        frames
    }

    /// Fold one upstream event. Nothing is emitted once terminated.
    pub fn apply(&mut self, event: UpstreamEvent, pipeline: &RedactionPipeline, frames: &mut Vec<Frame>) {
        if self.is_terminated() {
            return;
        }

        match event {
            UpstreamEvent::Usage {
                input_tokens,
                output_tokens,
                cache_creation_input_tokens,
                cache_read_input_tokens,
            } => {
                if let Some(n) = input_tokens {
                    self.usage.input_tokens = n;
                }
                if let Some(n) = output_tokens {
                    self.usage.output_tokens = n;
                }
                if let Some(n) = cache_creation_input_tokens {
                    self.usage.cache_creation_input_tokens = n;
                }
                if let Some(n) = cache_read_input_tokens {
                    self.usage.cache_read_input_tokens = n;
                }
            }
            UpstreamEvent::Begin { id } => self.ensure_started(id, frames),
            UpstreamEvent::Text(text) => {
                self.ensure_started(None, frames);
                let text = pipeline.filter_text(&text, FragmentMode::Stream);
                if !text.is_empty() {
                    let index = self.enter_block(OpenBlock::Text, frames);
                    frames.push(Frame::TextDelta { index, text });
                }
            }
            UpstreamEvent::Thinking(thinking) => {
                self.ensure_started(None, frames);
                let thinking = pipeline.filter_thinking(&thinking, FragmentMode::Stream);
                if !thinking.is_empty() {
                    let index = self.enter_block(OpenBlock::Thinking, frames);
                    frames.push(Frame::ThinkingDelta { index, thinking });
                }
            }
            UpstreamEvent::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                self.ensure_started(None, frames);
                self.apply_tool_call(index, id, name, arguments, frames);
            }
            UpstreamEvent::Stop(reason) => self.stop_reason = Some(reason),
            UpstreamEvent::Done => self.finish_into(frames),
            UpstreamEvent::Failed(detail) => {
                tracing::error!(upstream_error = %detail, "Upstream reported an error mid-stream");
                frames.push(Frame::Error(stream_interrupted(self.target)));
                self.phase = StreamPhase::Terminated;
            }
        }
    }

    /// Terminal sequence for a clean end of body.
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        self.finish_into(&mut frames);
        frames
    }

    /// End the stream after a transport failure. An error frame is emitted
    /// only if the caller already saw the start frame.
    pub fn fail(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.phase == StreamPhase::Streaming {
            frames.push(Frame::Error(stream_interrupted(self.target)));
        }
        self.phase = StreamPhase::Terminated;
        frames
    }

    fn ensure_started(&mut self, upstream_id: Option<String>, frames: &mut Vec<Frame>) {
        if self.phase != StreamPhase::AwaitingFirstEvent {
            return;
        }
        self.message_id = match upstream_id {
            Some(id) if !id.is_empty() && self.source == self.target => id,
            _ => generate_message_id(self.target),
        };
        self.phase = StreamPhase::Streaming;
        frames.push(Frame::Start {
            message_id: self.message_id.clone(),
            usage: self.usage,
        });
        self.enter_block(OpenBlock::Text, frames);
    }

    /// Make `kind` the open text or thinking block, closing the other one.
    fn enter_block(&mut self, kind: OpenBlock, frames: &mut Vec<Frame>) -> usize {
        if let Some((index, open)) = self.open {
            if open == kind {
                return index;
            }
        }
        self.close_open_block(frames);

        let index = self.allocate_block();
        self.open = Some((index, kind));
        let block = match kind {
            OpenBlock::Text => BlockKind::Text,
            OpenBlock::Thinking => BlockKind::Thinking,
        };
        frames.push(Frame::BlockOpen { index, block });
        index
    }

    fn close_open_block(&mut self, frames: &mut Vec<Frame>) {
        if let Some((index, _)) = self.open.take() {
            frames.push(Frame::BlockClose { index });
        }
    }

    fn allocate_block(&mut self) -> usize {
        let index = self.next_block;
        self.next_block += 1;
        index
    }

    fn apply_tool_call(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
        frames: &mut Vec<Frame>,
    ) {
        if !self.tool_calls.contains_key(&index) {
            self.close_open_block(frames);
            let block = self.allocate_block();
            let ordinal = self.tool_calls.len();
            let id = id
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| generate_tool_call_id(self.target));
            frames.push(Frame::BlockOpen {
                index: block,
                block: BlockKind::ToolUse {
                    tool_index: ordinal,
                    id,
                    name: name.unwrap_or_default(),
                },
            });
            self.tool_calls.insert(
                index,
                ToolCallState {
                    ordinal,
                    block,
                    arguments: String::new(),
                },
            );
        }

        let Some(fragment) = arguments.filter(|s| !s.is_empty()) else {
            return;
        };
        if let Some(tool) = self.tool_calls.get_mut(&index) {
            tool.arguments.push_str(&fragment);
            frames.push(Frame::ToolCallDelta {
                index: tool.block,
                tool_index: tool.ordinal,
                arguments: fragment,
            });
        }
    }

    fn finish_into(&mut self, frames: &mut Vec<Frame>) {
        if self.is_terminated() {
            return;
        }
        self.ensure_started(None, frames);

        let mut open: Vec<usize> = self.tool_calls.values().map(|t| t.block).collect();
        open.extend(self.open.take().map(|(index, _)| index));
        open.sort_unstable();
        frames.extend(open.into_iter().map(|index| Frame::BlockClose { index }));

        frames.push(Frame::Finish {
            stop_reason: self.stop_reason.unwrap_or_default(),
            usage: self.usage,
        });
        frames.push(Frame::Close);
        self.phase = StreamPhase::Terminated;
    }
}

pub(crate) fn generate_message_id(target: Dialect) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    match target {
        Dialect::Messages => format!("msg_{}", id),
        Dialect::ChatCompletions | Dialect::Responses => format!("chatcmpl-{}", id),
    }
}

fn generate_tool_call_id(target: Dialect) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    match target {
        Dialect::Messages => format!("toolu_{}", id),
        Dialect::ChatCompletions | Dialect::Responses => format!("call_{}", &id[..24]),
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Renders frames as SSE bytes of the target dialect.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    target: Dialect,
    model: String,
    created: i64,
    message_id: String,
}

impl FrameEncoder {
    pub fn new(target: Dialect, model: impl Into<String>) -> Self {
        Self {
            target,
            model: model.into(),
            created: unix_now(),
            message_id: String::new(),
        }
    }

    /// Encode one frame. Frames with no representation in the target
    /// dialect yield `None`.
    pub fn encode(&mut self, frame: &Frame) -> Option<Bytes> {
        if let Frame::Start { message_id, .. } = frame {
            self.message_id = message_id.clone();
        }
        let text = match self.target {
            Dialect::Messages => self.encode_messages(frame),
            Dialect::ChatCompletions | Dialect::Responses => self.encode_chat(frame),
        }?;
        Some(Bytes::from(text))
    }

    fn encode_messages(&self, frame: &Frame) -> Option<String> {
        use super::anthropic::constants::*;

        let (event, data) = match frame {
            Frame::Start { message_id, usage } => (
                EVENT_MESSAGE_START,
                json!({
                    "type": EVENT_MESSAGE_START,
                    "message": {
                        "id": message_id,
                        "type": "message",
                        "role": ROLE_ASSISTANT,
                        "model": self.model,
                        "content": [],
                        "stop_reason": null,
                        "stop_sequence": null,
                        "usage": messages_usage(usage)
                    }
                }),
            ),
            Frame::BlockOpen { index, block } => {
                let content_block = match block {
                    BlockKind::Text => json!({"type": CONTENT_TEXT, "text": ""}),
                    BlockKind::Thinking => json!({"type": CONTENT_THINKING, "thinking": ""}),
                    BlockKind::ToolUse { id, name, .. } => json!({
                        "type": CONTENT_TOOL_USE,
                        "id": id,
                        "name": name,
                        "input": {}
                    }),
                };
                (
                    EVENT_CONTENT_BLOCK_START,
                    json!({
                        "type": EVENT_CONTENT_BLOCK_START,
                        "index": index,
                        "content_block": content_block
                    }),
                )
            }
            Frame::TextDelta { index, text } => (
                EVENT_CONTENT_BLOCK_DELTA,
                json!({
                    "type": EVENT_CONTENT_BLOCK_DELTA,
                    "index": index,
                    "delta": {"type": DELTA_TEXT, "text": text}
                }),
            ),
            Frame::ThinkingDelta { index, thinking } => (
                EVENT_CONTENT_BLOCK_DELTA,
                json!({
                    "type": EVENT_CONTENT_BLOCK_DELTA,
                    "index": index,
                    "delta": {"type": DELTA_THINKING, "thinking": thinking}
                }),
            ),
            Frame::ToolCallDelta { index, arguments, .. } => (
                EVENT_CONTENT_BLOCK_DELTA,
                json!({
                    "type": EVENT_CONTENT_BLOCK_DELTA,
                    "index": index,
                    "delta": {"type": DELTA_INPUT_JSON, "partial_json": arguments}
                }),
            ),
            Frame::BlockClose { index } => (
                EVENT_CONTENT_BLOCK_STOP,
                json!({"type": EVENT_CONTENT_BLOCK_STOP, "index": index}),
            ),
            Frame::Finish { stop_reason, usage } => (
                EVENT_MESSAGE_DELTA,
                json!({
                    "type": EVENT_MESSAGE_DELTA,
                    "delta": {"stop_reason": stop_reason.as_messages(), "stop_sequence": null},
                    "usage": messages_usage(usage)
                }),
            ),
            Frame::Close => (EVENT_MESSAGE_STOP, json!({"type": EVENT_MESSAGE_STOP})),
            Frame::Error(body) => (EVENT_ERROR, body.clone()),
        };
        Some(format_sse_event(event, &data))
    }

    fn encode_chat(&self, frame: &Frame) -> Option<String> {
        let chunk = match frame {
            Frame::Start { .. } => self.chat_chunk(json!({"role": "assistant", "content": ""}), None),
            Frame::BlockOpen {
                block: BlockKind::ToolUse { tool_index, id, name },
                ..
            } => self.chat_chunk(
                json!({
                    "tool_calls": [{
                        "index": tool_index,
                        "id": id,
                        "type": "function",
                        "function": {"name": name, "arguments": ""}
                    }]
                }),
                None,
            ),
            Frame::BlockOpen { .. } | Frame::BlockClose { .. } => return None,
            Frame::TextDelta { text, .. } => self.chat_chunk(json!({"content": text}), None),
            Frame::ThinkingDelta { thinking, .. } => {
                self.chat_chunk(json!({"reasoning_content": thinking}), None)
            }
            Frame::ToolCallDelta {
                tool_index, arguments, ..
            } => self.chat_chunk(
                json!({
                    "tool_calls": [{
                        "index": tool_index,
                        "function": {"arguments": arguments}
                    }]
                }),
                None,
            ),
            Frame::Finish { stop_reason, usage } => {
                let mut chunk = self.chat_chunk(json!({}), Some(stop_reason.as_chat()));
                chunk["usage"] = json!({
                    "prompt_tokens": usage.input_tokens,
                    "completion_tokens": usage.output_tokens,
                    "total_tokens": usage.total()
                });
                chunk
            }
            Frame::Close => return Some(format_sse_done()),
            Frame::Error(body) => body.clone(),
        };
        Some(format_sse_data(&chunk))
    }

    fn chat_chunk(&self, delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.message_id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason
            }]
        })
    }
}

/// Usage object of the message-block dialect. Cache counters appear only
/// when the upstream reported them.
fn messages_usage(usage: &TokenUsage) -> Value {
    let mut value = json!({
        "input_tokens": usage.input_tokens,
        "output_tokens": usage.output_tokens
    });
    if usage.cache_creation_input_tokens > 0 {
        value["cache_creation_input_tokens"] = json!(usage.cache_creation_input_tokens);
    }
    if usage.cache_read_input_tokens > 0 {
        value["cache_read_input_tokens"] = json!(usage.cache_read_input_tokens);
    }
    value
}

// ============================================================================
// Session
// ============================================================================

/// Lives as long as the generator. Its `Drop` runs on completion, on
/// transport failure and on client disconnect alike.
struct StreamSession {
    ctx: TranscodeContext,
    sink: Arc<dyn UsageSink>,
    usage: TokenUsage,
    completed: bool,
    started_at: Instant,
}

impl StreamSession {
    fn new(ctx: TranscodeContext, sink: Arc<dyn UsageSink>) -> Self {
        get_metrics().active_streams.inc();
        Self {
            ctx,
            sink,
            usage: TokenUsage::default(),
            completed: false,
            started_at: Instant::now(),
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        get_metrics().active_streams.dec();
        let elapsed_ms = self.started_at.elapsed().as_millis() as u64;

        if self.completed {
            tracing::debug!(
                request_id = %self.ctx.request_id,
                elapsed_ms = elapsed_ms,
                "Stream completed"
            );
        } else {
            tracing::info!(
                request_id = %self.ctx.request_id,
                elapsed_ms = elapsed_ms,
                "Client disconnected before stream completed"
            );
        }

        if self.usage.has_tokens() {
            self.sink.record(self.ctx.usage_event(self.usage));
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Result of handling a streaming upstream call.
pub enum StreamReply {
    /// Upstream accepted the call; frames follow.
    Events(FrameStream),
    /// Upstream refused the call; serve this document instead.
    Error(SanitizedError),
}

/// Handle an upstream response to a streaming call.
///
/// A non-2xx status is answered with a sanitized JSON error and no frames.
pub async fn handle_stream(
    result: UpstreamResult,
    ctx: TranscodeContext,
    pipeline: Arc<RedactionPipeline>,
    sink: Arc<dyn UsageSink>,
) -> StreamReply {
    if !result.status.is_success() {
        let status = result.status.as_u16();
        let body = match result.into_bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(request_id = %ctx.request_id, error = %e, "Failed to read upstream error body");
                Bytes::new()
            }
        };
        return StreamReply::Error(sanitize(ctx.target, status, &body));
    }

    StreamReply::Events(transcode(result.into_body(), ctx, pipeline, sink))
}

/// Transcode an upstream SSE body into target-dialect frames.
pub fn transcode(
    body: BoxStream<'static, crate::core::Result<Bytes>>,
    ctx: TranscodeContext,
    pipeline: Arc<RedactionPipeline>,
    sink: Arc<dyn UsageSink>,
) -> FrameStream {
    let output = async_stream::stream! {
        let mut session = StreamSession::new(ctx.clone(), sink);
        let mut reader = LineReader::new(body);
        let mut state = StreamState::new(ctx.source, ctx.target);
        let mut encoder = FrameEncoder::new(ctx.target, ctx.model.clone());
        let mut event_name: Option<String> = None;

        loop {
            let frames = match reader.next_line().await {
                Ok(Some(line)) => match SseLine::parse(&line) {
                    SseLine::Event(name) => {
                        event_name = Some(name);
                        continue;
                    }
                    SseLine::Boundary => {
                        event_name = None;
                        continue;
                    }
                    SseLine::Ignored => continue,
                    SseLine::Data(data) => {
                        let events = decode_upstream(ctx.source, event_name.as_deref(), &data);
                        state.apply_all(events, &pipeline)
                    }
                },
                Ok(None) => state.finish(),
                Err(e) => {
                    tracing::error!(
                        request_id = %ctx.request_id,
                        error = %e,
                        started = state.has_started(),
                        "Upstream stream failed"
                    );
                    state.fail()
                }
            };
            session.usage = state.usage();

            for frame in &frames {
                if let Some(bytes) = encoder.encode(frame) {
                    yield Ok(bytes);
                }
            }
            if state.is_terminated() {
                break;
            }
        }

        session.completed = true;
    };
    output.boxed()
}
