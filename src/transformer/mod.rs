//! Transcoding between wire dialects.
//!
//! Upstream bodies are decoded once, at the boundary, into the tagged types of
//! their source dialect ([`anthropic`], [`openai`], [`response_api`]). The
//! streaming path folds those into dialect-neutral events and re-encodes them
//! as frames of the target dialect ([`stream`]); the whole-body path rebuilds
//! the target document ([`response`]).
//!
//! ```text
//! upstream bytes
//!     ↓
//! [sse::LineReader]        ← bounded line splitting
//!     ↓
//! source dialect decoder   ← typed events
//!     ↓
//! [stream::StreamState]    ← redaction, block bookkeeping, usage
//!     ↓
//! [stream::FrameEncoder]   ← target dialect frames
//!     ↓
//! caller
//! ```

pub mod anthropic;
pub mod openai;
pub mod request;
pub mod response;
pub mod response_api;
pub mod sse;
pub mod stream;

use crate::services::usage::UsageEvent;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub use response::{handle_non_stream, HandledResponse};
pub use stream::{handle_stream, StreamReply};

/// A wire format the relay speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    /// Chat-completion documents and `chat.completion.chunk` streams.
    #[default]
    ChatCompletions,
    /// Message-block documents and `message_start` .. `message_stop` streams.
    Messages,
    /// Response objects with `output[]` items; upstream source only.
    Responses,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::ChatCompletions => "chat_completions",
            Dialect::Messages => "messages",
            Dialect::Responses => "responses",
        }
    }

    /// Path of this dialect's endpoint on an upstream.
    pub fn upstream_path(self) -> &'static str {
        match self {
            Dialect::ChatCompletions => "/v1/chat/completions",
            Dialect::Messages => "/v1/messages",
            Dialect::Responses => "/v1/responses",
        }
    }

    /// Whether the relay can emit this dialect to a caller.
    pub fn is_target(self) -> bool {
        !matches!(self, Dialect::Responses)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "chat" | "chat_completions" => Ok(Dialect::ChatCompletions),
            "anthropic" | "claude" | "messages" => Ok(Dialect::Messages),
            "responses" | "response_api" => Ok(Dialect::Responses),
            _ => Err(format!("Unknown dialect: {}", s)),
        }
    }
}

/// Why generation stopped, independent of dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    #[default]
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
}

impl StopReason {
    /// Parse a message-block `stop_reason`. Unknown values count as end of turn.
    pub fn from_messages(value: &str) -> Self {
        match value {
            "max_tokens" => StopReason::MaxTokens,
            "tool_use" => StopReason::ToolUse,
            "stop_sequence" => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        }
    }

    /// Parse a chat-completion `finish_reason`.
    pub fn from_chat(value: &str) -> Self {
        match value {
            "length" => StopReason::MaxTokens,
            "tool_calls" | "function_call" => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        }
    }

    /// Parse a response-object `status`.
    pub fn from_response_status(value: &str) -> Self {
        match value {
            "incomplete" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        }
    }

    pub fn as_chat(self) -> &'static str {
        match self {
            StopReason::MaxTokens => "length",
            StopReason::ToolUse => "tool_calls",
            StopReason::EndTurn | StopReason::StopSequence => "stop",
        }
    }

    pub fn as_messages(self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::MaxTokens => "max_tokens",
            StopReason::ToolUse => "tool_use",
            StopReason::StopSequence => "stop_sequence",
        }
    }

    /// Render for a target dialect.
    pub fn render(self, dialect: Dialect) -> &'static str {
        match dialect {
            Dialect::Messages => self.as_messages(),
            Dialect::ChatCompletions | Dialect::Responses => self.as_chat(),
        }
    }
}

/// Token counters for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Prompt tokens written to the upstream's prompt cache
    pub cache_creation_input_tokens: u64,
    /// Prompt tokens served from the upstream's prompt cache
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Self::default()
        }
    }

    pub fn with_cache(mut self, creation: u64, read: u64) -> Self {
        self.cache_creation_input_tokens = creation;
        self.cache_read_input_tokens = read;
        self
    }

    pub fn has_tokens(&self) -> bool {
        self.input_tokens > 0
            || self.output_tokens > 0
            || self.cache_creation_input_tokens > 0
            || self.cache_read_input_tokens > 0
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Per-call facts both handlers need.
#[derive(Debug, Clone)]
pub struct TranscodeContext {
    /// Dialect the upstream answers in
    pub source: Dialect,
    /// Dialect the caller expects
    pub target: Dialect,
    /// Model name reported to the caller
    pub model: String,
    pub request_id: String,
}

impl TranscodeContext {
    pub fn new(source: Dialect, target: Dialect, model: impl Into<String>) -> Self {
        Self {
            source,
            target,
            model: model.into(),
            request_id: crate::core::logging::generate_request_id(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn is_passthrough(&self) -> bool {
        self.source == self.target
    }

    pub fn usage_event(&self, usage: TokenUsage) -> UsageEvent {
        UsageEvent {
            model: self.model.clone(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_creation_input_tokens: usage.cache_creation_input_tokens,
            cache_read_input_tokens: usage.cache_read_input_tokens,
        }
    }
}

/// Deserialize an optional field, treating a malformed value as absent.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// Current unix timestamp in seconds.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
