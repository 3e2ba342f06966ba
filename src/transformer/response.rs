//! Whole-body (non-streaming) response handling.

use super::anthropic::{ContentBlock, MessagesResponse};
use super::openai::{has_choices, ChatCompletion};
use super::response_api::ResponseObject;
use super::stream::generate_message_id;
use super::{unix_now, Dialect, StopReason, TokenUsage, TranscodeContext};
use crate::api::upstream::UpstreamResult;
use crate::core::{AppError, Result};
use crate::services::redaction::{FragmentMode, RedactionPipeline};
use crate::services::sanitizer::{sanitize, SanitizedError};
use crate::services::usage::UsageSink;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// Outcome of a non-streaming call.
#[derive(Debug, Clone, PartialEq)]
pub enum HandledResponse {
    /// Target-dialect document, served with 200
    Ok(Value),
    /// Upstream refused the call
    Error(SanitizedError),
}

impl HandledResponse {
    pub fn status(&self) -> StatusCode {
        match self {
            HandledResponse::Ok(_) => StatusCode::OK,
            HandledResponse::Error(e) => e.status,
        }
    }

    pub fn body(&self) -> &Value {
        match self {
            HandledResponse::Ok(body) => body,
            HandledResponse::Error(e) => &e.body,
        }
    }
}

impl IntoResponse for HandledResponse {
    fn into_response(self) -> Response {
        match self {
            HandledResponse::Ok(body) => Json(body).into_response(),
            HandledResponse::Error(e) => e.into_response(),
        }
    }
}

/// Materialize the upstream body and turn it into the caller's document.
pub async fn handle_non_stream(
    result: UpstreamResult,
    ctx: &TranscodeContext,
    pipeline: &RedactionPipeline,
    sink: &dyn UsageSink,
) -> Result<HandledResponse> {
    let status = result.status;
    let body = result.into_bytes().await?;

    if !status.is_success() {
        return Ok(HandledResponse::Error(sanitize(ctx.target, status.as_u16(), &body)));
    }

    let document: Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::error!(
            request_id = %ctx.request_id,
            dialect = %ctx.source,
            error = %e,
            body_len = body.len(),
            "Upstream response body is not JSON"
        );
        AppError::ParseResponse(e.to_string())
    })?;

    transcode_document(document, ctx, pipeline, sink).map(HandledResponse::Ok)
}

/// Whether a whole `source` document can be rewritten for a `target` caller.
pub fn can_transcode_document(source: Dialect, target: Dialect) -> bool {
    source == target
        || matches!(
            (source, target),
            (Dialect::Messages, Dialect::ChatCompletions)
                | (Dialect::ChatCompletions, Dialect::Messages)
                | (Dialect::Responses, Dialect::ChatCompletions)
        )
}

/// Rewrite a decoded upstream document for the target dialect.
pub fn transcode_document(
    document: Value,
    ctx: &TranscodeContext,
    pipeline: &RedactionPipeline,
    sink: &dyn UsageSink,
) -> Result<Value> {
    // Responses upstreams sometimes answer in chat-completion shape.
    let source = match ctx.source {
        Dialect::Responses if has_choices(&document) => Dialect::ChatCompletions,
        other => other,
    };

    match (source, ctx.target) {
        (Dialect::ChatCompletions, Dialect::ChatCompletions) => {
            let completion: ChatCompletion = decode(&document, ctx)?;
            report_usage(ctx, sink, completion.usage.map(TokenUsage::from));
            Ok(redact_chat_in_place(document, ctx, pipeline))
        }
        (Dialect::Messages, Dialect::Messages) => {
            let message: MessagesResponse = decode(&document, ctx)?;
            report_usage(ctx, sink, message.usage.map(TokenUsage::from));
            Ok(redact_messages_in_place(document, ctx, pipeline))
        }
        (Dialect::Messages, Dialect::ChatCompletions) => {
            let message: MessagesResponse = decode(&document, ctx)?;
            let usage = report_usage(ctx, sink, message.usage.clone().map(TokenUsage::from));
            Ok(messages_to_chat(message, usage, ctx, pipeline))
        }
        (Dialect::ChatCompletions, Dialect::Messages) => {
            let completion: ChatCompletion = decode(&document, ctx)?;
            let usage = report_usage(ctx, sink, completion.usage.clone().map(TokenUsage::from));
            Ok(chat_to_messages(completion, usage, ctx, pipeline))
        }
        (Dialect::Responses, Dialect::ChatCompletions) => {
            let response: ResponseObject = decode(&document, ctx)?;
            let usage = report_usage(ctx, sink, response.usage.clone().map(TokenUsage::from));
            Ok(responses_to_chat(response, usage, ctx, pipeline))
        }
        (source, target) => Err(AppError::BadRequest(format!(
            "Cannot serve {} responses to a {} client",
            source, target
        ))),
    }
}

fn decode<T: DeserializeOwned>(document: &Value, ctx: &TranscodeContext) -> Result<T> {
    T::deserialize(document).map_err(|e| {
        tracing::error!(
            request_id = %ctx.request_id,
            dialect = %ctx.source,
            error = %e,
            "Upstream response does not match its dialect"
        );
        AppError::ParseResponse(e.to_string())
    })
}

/// Send the usage event if the upstream reported usage. Returns the counts
/// for rendering.
fn report_usage(
    ctx: &TranscodeContext,
    sink: &dyn UsageSink,
    usage: Option<TokenUsage>,
) -> Option<TokenUsage> {
    let usage = usage?;
    sink.record(ctx.usage_event(usage));
    Some(usage)
}

// ============================================================================
// Same dialect: edit the envelope in place
// ============================================================================

fn redact_chat_in_place(mut document: Value, ctx: &TranscodeContext, pipeline: &RedactionPipeline) -> Value {
    document["model"] = json!(ctx.model);

    let Some(choices) = document.get_mut("choices").and_then(Value::as_array_mut) else {
        return document;
    };
    for choice in choices {
        let Some(message) = choice.get_mut("message").and_then(Value::as_object_mut) else {
            continue;
        };
        match message.get_mut("content") {
            Some(Value::String(text)) => *text = pipeline.filter_text(text, FragmentMode::Batch),
            Some(Value::Array(parts)) => {
                for part in parts {
                    if let Some(Value::String(text)) = part.get_mut("text") {
                        *text = pipeline.filter_text(text, FragmentMode::Batch);
                    }
                }
            }
            _ => {}
        }
        if let Some(Value::String(thinking)) = message.get_mut("reasoning_content") {
            *thinking = pipeline.filter_thinking(thinking, FragmentMode::Batch);
        }
    }
    document
}

fn redact_messages_in_place(
    mut document: Value,
    ctx: &TranscodeContext,
    pipeline: &RedactionPipeline,
) -> Value {
    document["model"] = json!(ctx.model);

    let Some(blocks) = document.get_mut("content").and_then(Value::as_array_mut) else {
        return document;
    };
    for block in blocks {
        let kind = block.get("type").and_then(Value::as_str).map(str::to_owned);
        match kind.as_deref() {
            // untyped blocks are legacy text
            Some("text") | None => {
                if let Some(Value::String(text)) = block.get_mut("text") {
                    *text = pipeline.filter_text(text, FragmentMode::Batch);
                }
            }
            Some("thinking") => {
                if let Some(Value::String(thinking)) = block.get_mut("thinking") {
                    *thinking = pipeline.filter_thinking(thinking, FragmentMode::Batch);
                }
            }
            Some(_) => {}
        }
    }
    document
}

// ============================================================================
// Cross dialect: rebuild the target document
// ============================================================================

fn chat_usage(usage: TokenUsage) -> Value {
    json!({
        "prompt_tokens": usage.input_tokens,
        "completion_tokens": usage.output_tokens,
        "total_tokens": usage.total()
    })
}

fn chat_completion(id: String, message: Value, finish_reason: &str, usage: Option<TokenUsage>, ctx: &TranscodeContext) -> Value {
    let id = if id.is_empty() {
        generate_message_id(Dialect::ChatCompletions)
    } else {
        id
    };
    let mut completion = json!({
        "id": id,
        "object": "chat.completion",
        "created": unix_now(),
        "model": ctx.model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason
        }]
    });
    if let Some(usage) = usage {
        completion["usage"] = chat_usage(usage);
    }
    completion
}

fn messages_to_chat(
    message: MessagesResponse,
    usage: Option<TokenUsage>,
    ctx: &TranscodeContext,
    pipeline: &RedactionPipeline,
) -> Value {
    let mut text = String::new();
    let mut thinking = String::new();
    let mut tool_calls = Vec::new();

    for block in message.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::Thinking { thinking: t, .. } => thinking.push_str(&t),
            ContentBlock::ToolUse { id, name, input } => {
                let arguments = if input.is_null() {
                    "{}".to_string()
                } else {
                    input.to_string()
                };
                tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments}
                }));
            }
            ContentBlock::Other => {}
        }
    }

    let text = pipeline.filter_text(&text, FragmentMode::Batch);
    let thinking = pipeline.filter_thinking(&thinking, FragmentMode::Batch);

    let mut reply = json!({"role": "assistant", "content": text});
    if !thinking.is_empty() {
        reply["reasoning_content"] = json!(thinking);
    }
    if !tool_calls.is_empty() {
        if text.is_empty() {
            reply["content"] = Value::Null;
        }
        reply["tool_calls"] = Value::Array(tool_calls);
    }

    let finish_reason = message
        .stop_reason
        .as_deref()
        .map(StopReason::from_messages)
        .unwrap_or_default()
        .as_chat();
    chat_completion(message.id, reply, finish_reason, usage, ctx)
}

fn chat_to_messages(
    completion: ChatCompletion,
    usage: Option<TokenUsage>,
    ctx: &TranscodeContext,
    pipeline: &RedactionPipeline,
) -> Value {
    let choice = completion.choices.into_iter().next().unwrap_or_default();
    let mut content = Vec::new();

    if let Some(thinking) = choice.message.reasoning_content.as_deref() {
        let thinking = pipeline.filter_thinking(thinking, FragmentMode::Batch);
        if !thinking.is_empty() {
            content.push(json!({"type": "thinking", "thinking": thinking}));
        }
    }
    if let Some(text) = choice.message.content.as_ref().map(|c| c.text()) {
        let text = pipeline.filter_text(&text, FragmentMode::Batch);
        if !text.is_empty() {
            content.push(json!({"type": "text", "text": text}));
        }
    }
    for call in choice.message.tool_calls {
        let arguments = call.function.arguments;
        let input = if arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&arguments).unwrap_or(Value::String(arguments))
        };
        content.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.function.name,
            "input": input
        }));
    }

    let stop_reason = choice
        .finish_reason
        .as_deref()
        .map(StopReason::from_chat)
        .unwrap_or_default();
    let id = if completion.id.is_empty() {
        generate_message_id(Dialect::Messages)
    } else {
        completion.id
    };
    let usage = usage.unwrap_or_default();

    json!({
        "id": id,
        "type": "message",
        "role": "assistant",
        "model": ctx.model,
        "content": content,
        "stop_reason": stop_reason.as_messages(),
        "stop_sequence": null,
        "usage": {
            "input_tokens": usage.input_tokens,
            "output_tokens": usage.output_tokens
        }
    })
}

fn responses_to_chat(
    response: ResponseObject,
    usage: Option<TokenUsage>,
    ctx: &TranscodeContext,
    pipeline: &RedactionPipeline,
) -> Value {
    let text = pipeline.filter_text(&response.message_text(), FragmentMode::Batch);
    let finish_reason = response.stop_reason().as_chat();
    chat_completion(
        response.id,
        json!({"role": "assistant", "content": text}),
        finish_reason,
        usage,
        ctx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::services::redaction::ThinkingFilterMode;
    use crate::services::usage::UsageEvent;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn pipeline() -> RedactionPipeline {
        RedactionPipeline::new(ThinkingFilterMode::KeywordBlock).unwrap()
    }

    fn run(source: Dialect, target: Dialect, document: Value) -> (Result<Value>, Vec<UsageEvent>) {
        let seen = Mutex::new(Vec::new());
        let sink = |event: UsageEvent| seen.lock().unwrap().push(event);
        let ctx = TranscodeContext::new(source, target, "client-model");
        let out = transcode_document(document, &ctx, &pipeline(), &sink);
        (out, seen.into_inner().unwrap())
    }

    #[test]
    fn test_chat_passthrough_substitutes_model_and_content() {
        let (out, usage) = run(
            Dialect::ChatCompletions,
            Dialect::ChatCompletions,
            json!({
                "id": "chatcmpl-1",
                "model": "upstream-model",
                "system_fingerprint": "fp_1",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi\n\n\n\nthere  "}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 2, "completion_tokens": 3, "total_tokens": 5}
            }),
        );
        let out = out.unwrap();
        assert_eq!(out["model"], "client-model");
        assert_eq!(out["system_fingerprint"], "fp_1");
        assert_eq!(out["choices"][0]["message"]["content"], "Hi\n\nthere");
        assert_eq!(
            usage,
            vec![UsageEvent {
                model: "client-model".into(),
                input_tokens: 2,
                output_tokens: 3,
                cache_creation_input_tokens: 0,
                cache_read_input_tokens: 0
            }]
        );
    }

    #[test]
    fn test_messages_to_chat_with_tools() {
        let (out, _) = run(
            Dialect::Messages,
            Dialect::ChatCompletions,
            json!({
                "id": "msg_1",
                "type": "message",
                "content": [
                    {"type": "thinking", "thinking": "let me check", "signature": "s"},
                    {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": "rust"}}
                ],
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 7, "output_tokens": 9}
            }),
        );
        let out = out.unwrap();
        let message = &out["choices"][0]["message"];
        assert_eq!(out["id"], "msg_1");
        assert_eq!(out["object"], "chat.completion");
        assert_eq!(message["content"], Value::Null);
        assert_eq!(message["reasoning_content"], "let me check");
        assert_eq!(message["tool_calls"][0]["function"]["arguments"], "{\"q\":\"rust\"}");
        assert_eq!(out["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(out["usage"]["total_tokens"], 16);
    }

    #[test]
    fn test_chat_to_messages() {
        let (out, _) = run(
            Dialect::ChatCompletions,
            Dialect::Messages,
            json!({
                "id": "chatcmpl-2",
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "Sure.",
                        "reasoning_content": "easy",
                        "tool_calls": [
                            {"id": "call_1", "type": "function", "function": {"name": "f", "arguments": "{\"x\":1}"}},
                            {"id": "call_2", "type": "function", "function": {"name": "g", "arguments": "not json"}}
                        ]
                    },
                    "finish_reason": "length"
                }]
            }),
        );
        let out = out.unwrap();
        assert_eq!(out["type"], "message");
        assert_eq!(out["stop_reason"], "max_tokens");
        assert_eq!(out["content"][0], json!({"type": "thinking", "thinking": "easy"}));
        assert_eq!(out["content"][1], json!({"type": "text", "text": "Sure."}));
        assert_eq!(out["content"][2]["input"], json!({"x": 1}));
        assert_eq!(out["content"][3]["input"], json!("not json"));
    }

    #[test]
    fn test_responses_to_chat() {
        let (out, usage) = run(
            Dialect::Responses,
            Dialect::ChatCompletions,
            json!({
                "id": "resp_1",
                "status": "incomplete",
                "output": [
                    {"type": "reasoning", "summary": [{"type": "summary_text", "text": "hidden"}]},
                    {"type": "message", "content": [{"type": "output_text", "text": "partial"}]}
                ],
                "usage": {"input_tokens": 4, "output_tokens": 8}
            }),
        );
        let out = out.unwrap();
        assert_eq!(out["choices"][0]["message"]["content"], "partial");
        assert_eq!(out["choices"][0]["finish_reason"], "length");
        assert!(!out.to_string().contains("hidden"));
        assert_eq!(usage.len(), 1);
    }

    #[test]
    fn test_responses_source_with_chat_shape() {
        let (out, _) = run(
            Dialect::Responses,
            Dialect::ChatCompletions,
            json!({"id": "c", "model": "m", "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}]}),
        );
        let out = out.unwrap();
        assert_eq!(out["model"], "client-model");
        assert_eq!(out["choices"][0]["message"]["content"], "ok");
    }

    #[test]
    fn test_unsupported_pair() {
        let (out, _) = run(Dialect::Responses, Dialect::Messages, json!({"output": []}));
        assert_matches!(out, Err(AppError::BadRequest(_)));
        assert!(!can_transcode_document(Dialect::Responses, Dialect::Messages));
        assert!(can_transcode_document(Dialect::Responses, Dialect::ChatCompletions));
        assert!(can_transcode_document(Dialect::Messages, Dialect::Messages));
    }

    #[test]
    fn test_messages_cache_tokens_are_reported() {
        let (out, usage) = run(
            Dialect::Messages,
            Dialect::ChatCompletions,
            json!({
                "id": "msg_c",
                "content": [{"type": "text", "text": "cached"}],
                "stop_reason": "end_turn",
                "usage": {
                    "input_tokens": 12,
                    "output_tokens": 4,
                    "cache_creation_input_tokens": 100,
                    "cache_read_input_tokens": 2048
                }
            }),
        );
        assert_eq!(out.unwrap()["usage"]["total_tokens"], 16);
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].cache_creation_input_tokens, 100);
        assert_eq!(usage[0].cache_read_input_tokens, 2048);
    }

    #[test]
    fn test_missing_usage_reports_nothing() {
        let (_, usage) = run(
            Dialect::Messages,
            Dialect::Messages,
            json!({"content": [{"type": "text", "text": "x"}], "usage": "bogus"}),
        );
        assert!(usage.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        let ctx = TranscodeContext::new(Dialect::Messages, Dialect::Messages, "m");
        let result = UpstreamResult::from_bytes(StatusCode::OK, "<html>oops</html>");
        let sink = |_: UsageEvent| {};
        let err = handle_non_stream(result, &ctx, &pipeline(), &sink).await.unwrap_err();
        assert_matches!(err, AppError::ParseResponse(_));
    }

    #[tokio::test]
    async fn test_error_status_is_sanitized() {
        let ctx = TranscodeContext::new(Dialect::ChatCompletions, Dialect::Messages, "m");
        let result = UpstreamResult::from_bytes(
            StatusCode::UNAUTHORIZED,
            r#"{"error":{"message":"key sk-live-123 revoked"}}"#,
        );
        let sink = |_: UsageEvent| {};
        let handled = handle_non_stream(result, &ctx, &pipeline(), &sink).await.unwrap();
        assert_eq!(handled.status(), StatusCode::UNAUTHORIZED);
        assert!(!handled.body().to_string().contains("sk-live"));
        assert_eq!(handled.body()["type"], "error");
    }
}
