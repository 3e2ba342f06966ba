//! Chat-completion dialect wire types.

use super::stream::UpstreamEvent;
use super::sse::decode_typed;
use super::{lenient, StopReason, TokenUsage};
use serde::Deserialize;
use serde_json::Value;

// ============================================================================
// Documents
// ============================================================================

/// Chat completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default, deserialize_with = "lenient")]
    pub usage: Option<ChatUsage>,
}

/// Chat choice structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Assistant message of a completion.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<ChatContent>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// Chat content can be string or array of content parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl ChatContent {
    /// Concatenated text of the content.
    pub fn text(&self) -> String {
        match self {
            ChatContent::Text(text) => text.clone(),
            ChatContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Other => None,
                })
                .collect(),
        }
    }
}

/// Content part for multimodal messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Tool call structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub function: FunctionCall,
}

/// Function call structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// Chat usage structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
}

impl ChatUsage {
    fn into_event(self) -> UpstreamEvent {
        UpstreamEvent::Usage {
            input_tokens: self.prompt_tokens,
            output_tokens: self.completion_tokens,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        }
    }
}

impl From<ChatUsage> for TokenUsage {
    fn from(usage: ChatUsage) -> Self {
        TokenUsage::new(usage.prompt_tokens.unwrap_or(0), usage.completion_tokens.unwrap_or(0))
    }
}

// ============================================================================
// Stream chunks
// ============================================================================

/// Chat streaming chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default, deserialize_with = "lenient")]
    pub usage: Option<ChatUsage>,
}

/// Chat streaming choice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Chat delta content.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<DeltaToolCall>,
}

/// Chat delta tool call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeltaToolCall {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<DeltaFunction>,
}

/// Chat delta function.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeltaFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Decode one `data:` payload of a chat stream.
pub fn decode_chunk(data: Value) -> Option<ChatChunk> {
    decode_typed(None, data)
}

/// True when a payload looks like a chat chunk or completion (has `choices`).
pub fn has_choices(value: &Value) -> bool {
    value.get("choices").map(Value::is_array).unwrap_or(false)
}

impl ChatChunk {
    /// Fold into dialect-neutral events, in order. Only the first choice is
    /// considered; the relay never requests `n > 1`.
    pub fn into_upstream_events(self) -> Vec<UpstreamEvent> {
        let mut events = vec![UpstreamEvent::Begin { id: self.id }];

        if let Some(choice) = self.choices.into_iter().next() {
            let delta = choice.delta;
            if let Some(thinking) = delta.reasoning_content.filter(|s| !s.is_empty()) {
                events.push(UpstreamEvent::Thinking(thinking));
            }
            if let Some(text) = delta.content.filter(|s| !s.is_empty()) {
                events.push(UpstreamEvent::Text(text));
            }
            for call in delta.tool_calls {
                let (name, arguments) = match call.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                events.push(UpstreamEvent::ToolCall {
                    index: call.index,
                    id: call.id,
                    name,
                    arguments,
                });
            }
            if let Some(reason) = choice.finish_reason {
                events.push(UpstreamEvent::Stop(StopReason::from_chat(&reason)));
            }
        }

        if let Some(usage) = self.usage {
            events.push(usage.into_event());
        }
        events
    }
}
