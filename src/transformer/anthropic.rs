//! Message-block dialect wire types.
//!
//! Documents and stream events are decoded once into the tagged enums below.
//! Blocks and deltas that arrive without a `type` are read as legacy text.

use super::stream::UpstreamEvent;
use super::sse::decode_typed;
use super::{lenient, StopReason, TokenUsage};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Message-block event and content type names.
pub mod constants {
    pub const EVENT_MESSAGE_START: &str = "message_start";
    pub const EVENT_MESSAGE_DELTA: &str = "message_delta";
    pub const EVENT_MESSAGE_STOP: &str = "message_stop";
    pub const EVENT_CONTENT_BLOCK_START: &str = "content_block_start";
    pub const EVENT_CONTENT_BLOCK_DELTA: &str = "content_block_delta";
    pub const EVENT_CONTENT_BLOCK_STOP: &str = "content_block_stop";
    pub const EVENT_ERROR: &str = "error";

    pub const CONTENT_TEXT: &str = "text";
    pub const CONTENT_THINKING: &str = "thinking";
    pub const CONTENT_TOOL_USE: &str = "tool_use";

    pub const DELTA_TEXT: &str = "text_delta";
    pub const DELTA_THINKING: &str = "thinking_delta";
    pub const DELTA_INPUT_JSON: &str = "input_json_delta";

    pub const ROLE_ASSISTANT: &str = "assistant";
}

// ============================================================================
// Documents
// ============================================================================

/// A complete (non-streamed) message.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "deserialize_blocks")]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub usage: Option<MessagesUsage>,
}

/// One content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Token counts as the message-block dialect names them. Each field is
/// optional because stream events report them piecemeal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MessagesUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

impl MessagesUsage {
    fn into_event(self) -> UpstreamEvent {
        UpstreamEvent::Usage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_creation_input_tokens: self.cache_creation_input_tokens,
            cache_read_input_tokens: self.cache_read_input_tokens,
        }
    }
}

impl From<MessagesUsage> for TokenUsage {
    fn from(usage: MessagesUsage) -> Self {
        TokenUsage::new(usage.input_tokens.unwrap_or(0), usage.output_tokens.unwrap_or(0)).with_cache(
            usage.cache_creation_input_tokens.unwrap_or(0),
            usage.cache_read_input_tokens.unwrap_or(0),
        )
    }
}

/// Wire shape of a block before legacy normalization.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireBlock {
    Tagged(ContentBlock),
    Legacy { text: String },
    Malformed(#[allow(dead_code)] Value),
}

impl From<WireBlock> for ContentBlock {
    fn from(wire: WireBlock) -> Self {
        match wire {
            WireBlock::Tagged(block) => block,
            WireBlock::Legacy { text } => ContentBlock::Text { text },
            WireBlock::Malformed(_) => ContentBlock::Other,
        }
    }
}

fn deserialize_blocks<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    let wire = Option::<Vec<WireBlock>>::deserialize(deserializer)?;
    Ok(wire
        .unwrap_or_default()
        .into_iter()
        .map(ContentBlock::from)
        .collect())
}

fn deserialize_block<'de, D>(deserializer: D) -> Result<ContentBlock, D::Error>
where
    D: Deserializer<'de>,
{
    WireBlock::deserialize(deserializer).map(ContentBlock::from)
}

// ============================================================================
// Stream events
// ============================================================================

/// One decoded stream event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        #[serde(default)]
        message: MessageStartBody,
    },
    ContentBlockStart {
        #[serde(default)]
        index: usize,
        #[serde(deserialize_with = "deserialize_block")]
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        #[serde(default)]
        index: usize,
        #[serde(deserialize_with = "deserialize_delta")]
        delta: BlockDelta,
    },
    ContentBlockStop {
        #[serde(default)]
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaBody,
        #[serde(default, deserialize_with = "lenient")]
        usage: Option<MessagesUsage>,
    },
    MessageStop,
    Ping,
    Error {
        #[serde(default)]
        error: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageStartBody {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub usage: Option<MessagesUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// Incremental content of a block.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta {
        #[serde(default)]
        text: String,
    },
    ThinkingDelta {
        #[serde(default)]
        thinking: String,
    },
    InputJsonDelta {
        #[serde(default)]
        partial_json: String,
    },
    SignatureDelta,
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireDelta {
    Tagged(BlockDelta),
    Legacy { text: String },
    Malformed(#[allow(dead_code)] Value),
}

fn deserialize_delta<'de, D>(deserializer: D) -> Result<BlockDelta, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match WireDelta::deserialize(deserializer)? {
        WireDelta::Tagged(delta) => delta,
        WireDelta::Legacy { text } => BlockDelta::TextDelta { text },
        WireDelta::Malformed(_) => BlockDelta::Other,
    })
}

/// Decode one `data:` payload. The preceding `event:` name stands in for a
/// missing `type`. Returns `None` for malformed payloads.
pub fn decode_stream_event(event_name: Option<&str>, data: Value) -> Option<StreamEvent> {
    decode_typed(event_name, data)
}

impl StreamEvent {
    /// Fold into dialect-neutral events, in order.
    pub fn into_upstream_events(self) -> Vec<UpstreamEvent> {
        match self {
            StreamEvent::MessageStart { message } => {
                let mut events = Vec::with_capacity(2);
                if let Some(usage) = message.usage {
                    events.push(usage.into_event());
                }
                events.push(UpstreamEvent::Begin { id: message.id });
                events
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::ToolUse { id, name, .. } => vec![UpstreamEvent::ToolCall {
                    index,
                    id: Some(id).filter(|s| !s.is_empty()),
                    name: Some(name),
                    arguments: None,
                }],
                // text/thinking starts may carry an initial fragment
                ContentBlock::Text { text } if !text.is_empty() => vec![UpstreamEvent::Text(text)],
                ContentBlock::Thinking { thinking, .. } if !thinking.is_empty() => {
                    vec![UpstreamEvent::Thinking(thinking)]
                }
                _ => vec![],
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => vec![UpstreamEvent::Text(text)],
                BlockDelta::ThinkingDelta { thinking } => vec![UpstreamEvent::Thinking(thinking)],
                BlockDelta::InputJsonDelta { partial_json } => vec![UpstreamEvent::ToolCall {
                    index,
                    id: None,
                    name: None,
                    arguments: Some(partial_json),
                }],
                BlockDelta::SignatureDelta | BlockDelta::Other => vec![],
            },
            StreamEvent::MessageDelta { delta, usage } => {
                let mut events = Vec::with_capacity(2);
                if let Some(usage) = usage {
                    events.push(usage.into_event());
                }
                if let Some(reason) = delta.stop_reason {
                    events.push(UpstreamEvent::Stop(StopReason::from_messages(&reason)));
                }
                events
            }
            StreamEvent::MessageStop => vec![UpstreamEvent::Done],
            StreamEvent::Error { error } => vec![UpstreamEvent::Failed(error)],
            StreamEvent::ContentBlockStop { .. } | StreamEvent::Ping | StreamEvent::Unknown => {
                vec![]
            }
        }
    }
}
