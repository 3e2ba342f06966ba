//! Response-object dialect wire types (upstream source only).
//!
//! Some upstreams that nominally speak this dialect answer in chat-completion
//! shape instead; callers check [`super::openai::has_choices`] first.

use super::stream::UpstreamEvent;
use super::sse::decode_typed;
use super::{lenient, StopReason, TokenUsage};
use serde::Deserialize;
use serde_json::Value;

/// A complete response object.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseObject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default, deserialize_with = "lenient")]
    pub usage: Option<ResponseUsage>,
}

impl ResponseObject {
    /// Text of the first `message` output item. Reasoning items are skipped.
    pub fn message_text(&self) -> String {
        self.output
            .iter()
            .find_map(|item| match item {
                OutputItem::Message { content } => Some(
                    content
                        .iter()
                        .filter_map(|part| part.text.as_deref())
                        .collect::<String>(),
                ),
                OutputItem::Other => None,
            })
            .unwrap_or_default()
    }

    pub fn stop_reason(&self) -> StopReason {
        self.status
            .as_deref()
            .map(StopReason::from_response_status)
            .unwrap_or_default()
    }
}

/// One item of `output[]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputContent {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResponseUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
}

impl From<ResponseUsage> for TokenUsage {
    fn from(usage: ResponseUsage) -> Self {
        TokenUsage::new(usage.input_tokens.unwrap_or(0), usage.output_tokens.unwrap_or(0))
    }
}

// ============================================================================
// Stream events
// ============================================================================

/// One decoded stream event. Reasoning-summary and bookkeeping events fall
/// into `Unknown` and produce nothing.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseStreamEvent {
    #[serde(rename = "response.created")]
    Created {
        #[serde(default)]
        response: Option<ResponseSnapshot>,
    },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        #[serde(default)]
        delta: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },
    #[serde(rename = "response.completed", alias = "response.done")]
    Completed {
        #[serde(default)]
        response: Option<ResponseSnapshot>,
    },
    #[serde(rename = "response.incomplete")]
    Incomplete {
        #[serde(default)]
        response: Option<ResponseSnapshot>,
    },
    #[serde(rename = "response.failed", alias = "error")]
    Failed {
        #[serde(default)]
        error: Value,
    },
    #[serde(other)]
    Unknown,
}

/// The `response` object embedded in lifecycle events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseSnapshot {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub usage: Option<ResponseUsage>,
}

impl ResponseSnapshot {
    fn usage_event(&self) -> Option<UpstreamEvent> {
        self.usage.as_ref().map(|u| UpstreamEvent::Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        })
    }
}

/// Decode one `data:` payload of a response-object stream.
pub fn decode_stream_event(event_name: Option<&str>, data: Value) -> Option<ResponseStreamEvent> {
    decode_typed(event_name, data)
}

impl ResponseStreamEvent {
    /// Fold into dialect-neutral events, in order.
    pub fn into_upstream_events(self) -> Vec<UpstreamEvent> {
        match self {
            ResponseStreamEvent::Created { response } => vec![UpstreamEvent::Begin {
                id: response.and_then(|r| r.id),
            }],
            ResponseStreamEvent::OutputTextDelta { delta, text } => delta
                .or(text)
                .filter(|s| !s.is_empty())
                .map(|s| vec![UpstreamEvent::Text(s)])
                .unwrap_or_default(),
            ResponseStreamEvent::Completed { response } => {
                let snapshot = response.unwrap_or_default();
                let reason = snapshot
                    .status
                    .as_deref()
                    .map(StopReason::from_response_status)
                    .unwrap_or_default();
                let mut events: Vec<UpstreamEvent> = snapshot.usage_event().into_iter().collect();
                events.push(UpstreamEvent::Stop(reason));
                events.push(UpstreamEvent::Done);
                events
            }
            ResponseStreamEvent::Incomplete { response } => {
                let mut events: Vec<UpstreamEvent> = response
                    .as_ref()
                    .and_then(ResponseSnapshot::usage_event)
                    .into_iter()
                    .collect();
                events.push(UpstreamEvent::Stop(StopReason::MaxTokens));
                events.push(UpstreamEvent::Done);
                events
            }
            ResponseStreamEvent::Failed { error } => vec![UpstreamEvent::Failed(error)],
            ResponseStreamEvent::Unknown => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode(event_name: Option<&str>, data: &str) -> ResponseStreamEvent {
        decode_stream_event(event_name, serde_json::from_str(data).unwrap()).unwrap()
    }

    #[test]
    fn test_message_text_skips_reasoning() {
        let doc: ResponseObject = serde_json::from_str(
            r#"{
                "id": "resp_1",
                "status": "incomplete",
                "output": [
                    {"type": "reasoning", "summary": [{"text": "secret plan"}]},
                    {"type": "message", "content": [{"type": "output_text", "text": "Hi "}, {"type": "output_text", "text": "there"}]}
                ],
                "usage": {"input_tokens": 4, "output_tokens": 2}
            }"#,
        )
        .unwrap();
        assert_eq!(doc.message_text(), "Hi there");
        assert_eq!(doc.stop_reason(), StopReason::MaxTokens);
    }

    #[test]
    fn test_text_delta_prefers_delta_field() {
        let event = decode(None, r#"{"type":"response.output_text.delta","delta":"a","text":"b"}"#);
        assert_eq!(event.into_upstream_events(), vec![UpstreamEvent::Text("a".into())]);

        let event = decode(Some("response.output_text.delta"), r#"{"text":"b"}"#);
        assert_eq!(event.into_upstream_events(), vec![UpstreamEvent::Text("b".into())]);
    }

    #[test]
    fn test_reasoning_summary_is_dropped() {
        for name in [
            "response.reasoning_summary_text.delta",
            "response.reasoning_summary_part.done",
            "response.in_progress",
            "response.output_item.added",
        ] {
            let data = format!(r#"{{"type":"{}","delta":"thinking about the system prompt"}}"#, name);
            let event = decode(None, &data);
            assert!(event.into_upstream_events().is_empty(), "{} leaked", name);
        }
    }

    #[test]
    fn test_done_and_incomplete() {
        let event = decode(
            None,
            r#"{"type":"response.done","response":{"status":"completed","usage":{"input_tokens":3,"output_tokens":5}}}"#,
        );
        assert_eq!(
            event.into_upstream_events(),
            vec![
                UpstreamEvent::Usage {
                    input_tokens: Some(3),
                    output_tokens: Some(5),
                    cache_creation_input_tokens: None,
                    cache_read_input_tokens: None
                },
                UpstreamEvent::Stop(StopReason::EndTurn),
                UpstreamEvent::Done,
            ]
        );

        let event = decode(None, r#"{"type":"response.incomplete"}"#);
        assert_eq!(
            event.into_upstream_events(),
            vec![UpstreamEvent::Stop(StopReason::MaxTokens), UpstreamEvent::Done]
        );
    }
}
