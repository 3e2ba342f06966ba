//! Whole-body transcoding tests.
//!
//! Scenarios:
//! - Message-block upstream answering a chat caller (text, tools, length stop)
//! - Chat upstream answering a message-block caller
//! - Same-dialect passthrough keeps unknown fields
//! - Request adaptation round trips through the upstream dialect

use axum::http::StatusCode;
use llm_relay::api::UpstreamResult;
use llm_relay::services::{RedactionPipeline, ThinkingFilterMode, UsageEvent};
use llm_relay::transformer::request::{adapt_request, DEFAULT_MAX_TOKENS};
use llm_relay::transformer::{handle_non_stream, Dialect, HandledResponse, TranscodeContext};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Mutex;

// ============================================================================
// Test Helpers
// ============================================================================

async fn transcode(source: Dialect, target: Dialect, status: StatusCode, body: Value) -> (HandledResponse, Vec<UsageEvent>) {
    let seen = Mutex::new(Vec::new());
    let sink = |event: UsageEvent| seen.lock().unwrap().push(event);
    let ctx = TranscodeContext::new(source, target, "client-model").with_request_id("req-test");
    let pipeline = RedactionPipeline::new(ThinkingFilterMode::KeywordBlock).unwrap();
    let result = UpstreamResult::from_bytes(status, body.to_string());

    let handled = handle_non_stream(result, &ctx, &pipeline, &sink).await.unwrap();
    (handled, seen.into_inner().unwrap())
}

fn ok_body(handled: &HandledResponse) -> &Value {
    assert_eq!(handled.status(), StatusCode::OK);
    handled.body()
}

// ============================================================================
// Message-block upstream → chat caller
// ============================================================================

#[tokio::test]
async fn test_tool_use_becomes_tool_calls() {
    let (handled, usage) = transcode(
        Dialect::Messages,
        Dialect::ChatCompletions,
        StatusCode::OK,
        json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "model": "upstream-model",
            "content": [
                {"type": "tool_use", "id": "toolu_01", "name": "lookup", "input": {"q": "rust"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 8}
        }),
    )
    .await;

    let body = ok_body(&handled);
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["id"], "msg_01");
    assert_eq!(body["model"], "client-model");

    let message = &body["choices"][0]["message"];
    assert_eq!(message["content"], Value::Null);
    assert_eq!(message["tool_calls"][0]["id"], "toolu_01");
    assert_eq!(message["tool_calls"][0]["type"], "function");
    assert_eq!(message["tool_calls"][0]["function"]["name"], "lookup");
    let arguments: Value =
        serde_json::from_str(message["tool_calls"][0]["function"]["arguments"].as_str().unwrap()).unwrap();
    assert_eq!(arguments, json!({"q": "rust"}));
    assert_eq!(body["choices"][0]["finish_reason"], "tool_calls");

    assert_eq!(body["usage"]["total_tokens"], 20);
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].input_tokens, 12);
}

#[tokio::test]
async fn test_max_tokens_becomes_length() {
    let (handled, _) = transcode(
        Dialect::Messages,
        Dialect::ChatCompletions,
        StatusCode::OK,
        json!({
            "id": "msg_02",
            "content": [
                {"type": "thinking", "thinking": "Let me count."},
                {"type": "text", "text": "One, two"}
            ],
            "stop_reason": "max_tokens"
        }),
    )
    .await;

    let body = ok_body(&handled);
    assert_eq!(body["choices"][0]["finish_reason"], "length");
    assert_eq!(body["choices"][0]["message"]["content"], "One, two");
    assert_eq!(body["choices"][0]["message"]["reasoning_content"], "Let me count.");
    assert!(body.get("usage").is_none());
}

// ============================================================================
// Chat upstream → message-block caller
// ============================================================================

#[tokio::test]
async fn test_chat_completion_to_message() {
    let (handled, usage) = transcode(
        Dialect::ChatCompletions,
        Dialect::Messages,
        StatusCode::OK,
        json!({
            "id": "chatcmpl-9",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Checking.",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "search", "arguments": "{\"term\":\"axum\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 30, "completion_tokens": 11, "total_tokens": 41}
        }),
    )
    .await;

    let body = ok_body(&handled);
    assert_eq!(body["type"], "message");
    assert_eq!(body["model"], "client-model");
    assert_eq!(body["stop_reason"], "tool_use");
    assert_eq!(
        body["content"],
        json!([
            {"type": "text", "text": "Checking."},
            {"type": "tool_use", "id": "call_1", "name": "search", "input": {"term": "axum"}}
        ])
    );
    assert_eq!(body["usage"], json!({"input_tokens": 30, "output_tokens": 11}));
    assert_eq!(
        usage,
        vec![UsageEvent {
            model: "client-model".to_string(),
            input_tokens: 30,
            output_tokens: 11,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0
        }]
    );
}

// ============================================================================
// Passthrough and errors
// ============================================================================

#[tokio::test]
async fn test_passthrough_keeps_unknown_fields() {
    let (handled, _) = transcode(
        Dialect::Messages,
        Dialect::Messages,
        StatusCode::OK,
        json!({
            "id": "msg_03",
            "type": "message",
            "model": "upstream-model",
            "content": [{"type": "text", "text": "I am Droid, happy to help."}],
            "stop_reason": "end_turn",
            "container": {"id": "cntr_1"},
            "usage": {"input_tokens": 1, "output_tokens": 2, "service_tier": "standard"}
        }),
    )
    .await;

    let body = ok_body(&handled);
    assert_eq!(body["id"], "msg_03");
    assert_eq!(body["model"], "client-model");
    assert_eq!(body["container"], json!({"id": "cntr_1"}));
    assert_eq!(body["usage"]["service_tier"], "standard");
    assert_eq!(body["content"][0]["text"], "I am Claude, happy to help.");
}

#[tokio::test]
async fn test_error_body_is_replaced() {
    let (handled, usage) = transcode(
        Dialect::ChatCompletions,
        Dialect::ChatCompletions,
        StatusCode::UNAUTHORIZED,
        json!({"error": {"message": "key sk-live-abc revoked for org 42"}}),
    )
    .await;

    assert_eq!(handled.status(), StatusCode::UNAUTHORIZED);
    let rendered = handled.body().to_string();
    assert!(!rendered.contains("sk-live-abc"));
    assert_eq!(handled.body()["error"]["type"], "authentication_error");
    assert!(usage.is_empty());
}

// ============================================================================
// Request adaptation
// ============================================================================

#[test]
fn test_messages_request_for_chat_upstream() {
    let body = json!({
        "model": "claude-sonnet",
        "system": "Be brief.",
        "stream": true,
        "max_tokens": 256,
        "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}]
    });
    let adapted = adapt_request(
        body.to_string().as_bytes(),
        Dialect::Messages,
        Dialect::ChatCompletions,
        Some("gpt-upstream"),
    )
    .unwrap();

    assert!(adapted.streaming);
    assert_eq!(adapted.client_model, "claude-sonnet");

    let forwarded: Value = serde_json::from_slice(&adapted.body).unwrap();
    assert_eq!(forwarded["model"], "gpt-upstream");
    assert_eq!(forwarded["messages"][0], json!({"role": "system", "content": "Be brief."}));
    assert_eq!(forwarded["stream_options"]["include_usage"], true);
}

#[test]
fn test_chat_request_for_messages_upstream_gets_max_tokens() {
    let body = json!({
        "model": "gpt-4o",
        "messages": [
            {"role": "system", "content": "Be brief."},
            {"role": "user", "content": "hi"}
        ]
    });
    let adapted = adapt_request(body.to_string().as_bytes(), Dialect::ChatCompletions, Dialect::Messages, None).unwrap();

    let forwarded: Value = serde_json::from_slice(&adapted.body).unwrap();
    assert!(!adapted.streaming);
    assert_eq!(forwarded["max_tokens"], DEFAULT_MAX_TOKENS);
    assert_eq!(forwarded["system"], "Be brief.");
    assert_eq!(forwarded["messages"].as_array().unwrap().len(), 1);
}
