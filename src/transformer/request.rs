//! Inbound request adaptation.
//!
//! The caller's request body is rewritten into the upstream's dialect before
//! forwarding. Only the fields that differ between dialects are touched;
//! sampling parameters are carried over as-is.

use super::Dialect;
use crate::core::{AppError, Result};
use bytes::Bytes;
use serde_json::{json, Map, Value};

/// Default `max_tokens` when a message-block upstream requires one.
pub const DEFAULT_MAX_TOKENS: u64 = 4096;

const SAMPLING_FIELDS: &[&str] = &["temperature", "top_p"];

/// An inbound request rewritten for the upstream.
#[derive(Debug, Clone)]
pub struct AdaptedRequest {
    pub body: Bytes,
    pub streaming: bool,
    /// Model the caller asked for; reported back in every response
    pub client_model: String,
}

/// Rewrite a `client`-dialect request body for an `upstream`-dialect endpoint.
/// `model_override` replaces the forwarded model name only.
pub fn adapt_request(
    body: &[u8],
    client: Dialect,
    upstream: Dialect,
    model_override: Option<&str>,
) -> Result<AdaptedRequest> {
    let request: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))?;
    let Value::Object(request) = request else {
        return Err(AppError::BadRequest("Request body must be a JSON object".to_string()));
    };

    let client_model = request
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| AppError::BadRequest("model is required".to_string()))?
        .to_string();
    let streaming = request.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let model = model_override.unwrap_or(&client_model);

    let adapted = match (client, upstream) {
        (client, upstream) if client == upstream => {
            let needs_usage = streaming && upstream == Dialect::ChatCompletions && !requests_usage(&request);
            if model_override.is_none() && !needs_usage {
                return Ok(AdaptedRequest {
                    body: Bytes::copy_from_slice(body),
                    streaming,
                    client_model,
                });
            }
            let mut request = request;
            request.insert("model".to_string(), json!(model));
            if needs_usage {
                request_stream_usage(&mut request);
            }
            Value::Object(request)
        }
        (Dialect::Messages, Dialect::ChatCompletions) => messages_to_chat_request(&request, model, streaming),
        (Dialect::ChatCompletions, Dialect::Messages) => chat_to_messages_request(&request, model, streaming),
        (Dialect::ChatCompletions, Dialect::Responses) => chat_to_responses_request(&request, model, streaming),
        (Dialect::Messages, Dialect::Responses) => {
            let chat = messages_to_chat_request(&request, model, streaming);
            let chat = chat.as_object().cloned().unwrap_or_default();
            chat_to_responses_request(&chat, model, streaming)
        }
        (client, upstream) => {
            return Err(AppError::BadRequest(format!(
                "Cannot forward {} requests to a {} upstream",
                client, upstream
            )))
        }
    };

    tracing::debug!(
        client = %client,
        upstream = %upstream,
        model = %model,
        streaming = streaming,
        "Adapted request for upstream"
    );

    Ok(AdaptedRequest {
        body: Bytes::from(serde_json::to_vec(&adapted)?),
        streaming,
        client_model,
    })
}

/// Whether a chat request already asks for a trailing usage chunk.
fn requests_usage(request: &Map<String, Value>) -> bool {
    request
        .get("stream_options")
        .and_then(|o| o.get("include_usage"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Ask a chat upstream for a trailing usage chunk, keeping any other
/// stream options the caller set.
fn request_stream_usage(request: &mut Map<String, Value>) {
    let options = request
        .entry("stream_options")
        .or_insert_with(|| json!({}));
    if !options.is_object() {
        *options = json!({});
    }
    options["include_usage"] = json!(true);
}

fn copy_fields(from: &Map<String, Value>, to: &mut Value, fields: &[&str]) {
    for field in fields {
        if let Some(value) = from.get(*field).filter(|v| !v.is_null()) {
            to[*field] = value.clone();
        }
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn block_type(block: &Value) -> &str {
    str_field(block, "type").unwrap_or("text")
}

// ============================================================================
// Messages -> Chat
// ============================================================================

fn messages_to_chat_request(request: &Map<String, Value>, model: &str, streaming: bool) -> Value {
    let mut messages: Vec<Value> = Vec::new();

    if let Some(system) = request.get("system") {
        let text = joined_text(system, "\n\n");
        if !text.trim().is_empty() {
            messages.push(json!({"role": "system", "content": text.trim()}));
        }
    }

    for message in request.get("messages").and_then(Value::as_array).into_iter().flatten() {
        let role = str_field(message, "role").unwrap_or("user");
        match message.get("content") {
            Some(Value::String(text)) => messages.push(json!({"role": role, "content": text})),
            Some(Value::Array(blocks)) if role == "assistant" => {
                messages.push(assistant_blocks_to_chat(blocks));
            }
            Some(Value::Array(blocks)) => messages.extend(user_blocks_to_chat(blocks)),
            _ => {}
        }
    }

    let mut chat = json!({
        "model": model,
        "messages": messages,
        "stream": streaming,
    });
    copy_fields(request, &mut chat, &["max_tokens"]);
    copy_fields(request, &mut chat, SAMPLING_FIELDS);
    if let Some(stop) = request.get("stop_sequences").filter(|v| !v.is_null()) {
        chat["stop"] = stop.clone();
    }
    if let Some(tools) = request.get("tools").and_then(Value::as_array) {
        let tools: Vec<Value> = tools
            .iter()
            .filter_map(|tool| {
                let name = str_field(tool, "name").filter(|n| !n.trim().is_empty())?;
                Some(json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": str_field(tool, "description").unwrap_or(""),
                        "parameters": tool.get("input_schema").cloned().unwrap_or_else(|| json!({"type": "object"}))
                    }
                }))
            })
            .collect();
        if !tools.is_empty() {
            chat["tools"] = Value::Array(tools);
        }
    }
    if let Some(choice) = request.get("tool_choice") {
        chat["tool_choice"] = match (str_field(choice, "type"), str_field(choice, "name")) {
            (Some("tool"), Some(name)) => json!({"type": "function", "function": {"name": name}}),
            (Some("any"), _) => json!("required"),
            (Some("none"), _) => json!("none"),
            _ => json!("auto"),
        };
    }
    if streaming {
        chat["stream_options"] = json!({"include_usage": true});
    }
    chat
}

fn assistant_blocks_to_chat(blocks: &[Value]) -> Value {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block_type(block) {
            "text" => text.push_str(str_field(block, "text").unwrap_or("")),
            "tool_use" => {
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(json!({
                    "id": str_field(block, "id").unwrap_or(""),
                    "type": "function",
                    "function": {
                        "name": str_field(block, "name").unwrap_or(""),
                        "arguments": input.to_string()
                    }
                }));
            }
            _ => {}
        }
    }

    let mut message = json!({"role": "assistant", "content": text});
    if !tool_calls.is_empty() {
        if text.is_empty() {
            message["content"] = Value::Null;
        }
        message["tool_calls"] = Value::Array(tool_calls);
    }
    message
}

/// Tool results become `tool` messages ahead of the remaining user content.
fn user_blocks_to_chat(blocks: &[Value]) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut parts = Vec::new();

    for block in blocks {
        match block_type(block) {
            "tool_result" => messages.push(json!({
                "role": "tool",
                "tool_call_id": str_field(block, "tool_use_id").unwrap_or(""),
                "content": tool_result_text(block.get("content").unwrap_or(&Value::Null))
            })),
            "text" => parts.push(json!({"type": "text", "text": str_field(block, "text").unwrap_or("")})),
            "image" => {
                let source = block.get("source").unwrap_or(&Value::Null);
                let url = match str_field(source, "type") {
                    Some("url") => str_field(source, "url").unwrap_or("").to_string(),
                    _ => format!(
                        "data:{};base64,{}",
                        str_field(source, "media_type").unwrap_or("image/png"),
                        str_field(source, "data").unwrap_or("")
                    ),
                };
                parts.push(json!({"type": "image_url", "image_url": {"url": url}}));
            }
            _ => {}
        }
    }

    match parts.as_slice() {
        [] => {}
        [only] if only["type"] == "text" => {
            messages.push(json!({"role": "user", "content": only["text"]}));
        }
        _ => messages.push(json!({"role": "user", "content": parts})),
    }
    messages
}

fn tool_result_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(_) => joined_text(content, "\n"),
        other => other.to_string(),
    }
}

/// Text of a string or an array of text blocks.
fn joined_text(value: &Value, separator: &str) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                Value::String(s) => Some(s.as_str()),
                _ if block_type(b) == "text" => str_field(b, "text"),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(separator),
        _ => String::new(),
    }
}

// ============================================================================
// Chat -> Messages
// ============================================================================

fn chat_to_messages_request(request: &Map<String, Value>, model: &str, streaming: bool) -> Value {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<Value> = Vec::new();

    for message in request.get("messages").and_then(Value::as_array).into_iter().flatten() {
        let content = message.get("content").unwrap_or(&Value::Null);
        match str_field(message, "role").unwrap_or("user") {
            "system" | "developer" => {
                let text = joined_text(content, "\n");
                if !text.trim().is_empty() {
                    system_parts.push(text);
                }
            }
            "assistant" => {
                let mut blocks = content_to_blocks(content);
                for call in message.get("tool_calls").and_then(Value::as_array).into_iter().flatten() {
                    let function = call.get("function").unwrap_or(&Value::Null);
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": str_field(call, "id").unwrap_or(""),
                        "name": str_field(function, "name").unwrap_or(""),
                        "input": parse_arguments(str_field(function, "arguments").unwrap_or(""))
                    }));
                }
                if !blocks.is_empty() {
                    messages.push(json!({"role": "assistant", "content": blocks}));
                }
            }
            "tool" => {
                let result = json!({
                    "type": "tool_result",
                    "tool_use_id": str_field(message, "tool_call_id").unwrap_or(""),
                    "content": joined_text(content, "\n")
                });
                // consecutive tool results share one user turn
                match messages.last_mut() {
                    Some(last) if is_tool_result_turn(last) => {
                        if let Some(blocks) = last["content"].as_array_mut() {
                            blocks.push(result);
                        }
                    }
                    _ => messages.push(json!({"role": "user", "content": [result]})),
                }
            }
            _ => match content {
                Value::String(text) => messages.push(json!({"role": "user", "content": text})),
                other => {
                    let blocks = content_to_blocks(other);
                    if !blocks.is_empty() {
                        messages.push(json!({"role": "user", "content": blocks}));
                    }
                }
            },
        }
    }

    let max_tokens = request
        .get("max_tokens")
        .or_else(|| request.get("max_completion_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_MAX_TOKENS);

    let mut out = json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
        "stream": streaming,
    });
    if !system_parts.is_empty() {
        out["system"] = json!(system_parts.join("\n\n"));
    }
    copy_fields(request, &mut out, SAMPLING_FIELDS);
    match request.get("stop") {
        Some(Value::String(stop)) => out["stop_sequences"] = json!([stop]),
        Some(stop @ Value::Array(_)) => out["stop_sequences"] = stop.clone(),
        _ => {}
    }
    if let Some(tools) = request.get("tools").and_then(Value::as_array) {
        let tools: Vec<Value> = tools
            .iter()
            .filter_map(|tool| {
                let function = tool.get("function")?;
                Some(json!({
                    "name": str_field(function, "name")?,
                    "description": str_field(function, "description").unwrap_or(""),
                    "input_schema": function.get("parameters").cloned().unwrap_or_else(|| json!({"type": "object"}))
                }))
            })
            .collect();
        if !tools.is_empty() {
            out["tools"] = Value::Array(tools);
        }
    }
    if let Some(choice) = request.get("tool_choice") {
        let name = choice.get("function").and_then(|f| str_field(f, "name"));
        out["tool_choice"] = match (choice.as_str(), name) {
            (_, Some(name)) => json!({"type": "tool", "name": name}),
            (Some("required"), _) => json!({"type": "any"}),
            (Some("none"), _) => json!({"type": "none"}),
            _ => json!({"type": "auto"}),
        };
    }
    out
}

fn is_tool_result_turn(message: &Value) -> bool {
    message["role"] == "user"
        && message["content"]
            .as_array()
            .map(|blocks| blocks.iter().all(|b| b["type"] == "tool_result"))
            .unwrap_or(false)
}

fn content_to_blocks(content: &Value) -> Vec<Value> {
    match content {
        Value::String(text) if !text.is_empty() => vec![json!({"type": "text", "text": text})],
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match block_type(part) {
                "text" => Some(json!({"type": "text", "text": str_field(part, "text").unwrap_or("")})),
                "image_url" => {
                    let url = part.get("image_url").and_then(|i| str_field(i, "url")).unwrap_or("");
                    Some(image_block(url))
                }
                _ => None,
            })
            .collect(),
        _ => vec![],
    }
}

fn image_block(url: &str) -> Value {
    if let Some((meta, data)) = url.strip_prefix("data:").and_then(|rest| rest.split_once(',')) {
        let media_type = meta.trim_end_matches(";base64");
        return json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data}
        });
    }
    json!({"type": "image", "source": {"type": "url", "url": url}})
}

/// Tool arguments travel as a JSON string; unparseable text is kept verbatim.
fn parse_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()))
}

// ============================================================================
// Chat -> Responses
// ============================================================================

fn chat_to_responses_request(request: &Map<String, Value>, model: &str, streaming: bool) -> Value {
    let mut input: Vec<Value> = Vec::new();

    for message in request.get("messages").and_then(Value::as_array).into_iter().flatten() {
        let role = str_field(message, "role").unwrap_or("user");
        let content = message.get("content").unwrap_or(&Value::Null);
        match role {
            "tool" => input.push(json!({
                "type": "function_call_output",
                "call_id": str_field(message, "tool_call_id").unwrap_or(""),
                "output": joined_text(content, "\n")
            })),
            _ => {
                match content {
                    Value::String(text) => input.push(json!({"role": role, "content": text})),
                    Value::Array(parts) => {
                        let parts: Vec<Value> = parts.iter().filter_map(|p| responses_part(p, role)).collect();
                        if !parts.is_empty() {
                            input.push(json!({"role": role, "content": parts}));
                        }
                    }
                    _ => {}
                }
                for call in message.get("tool_calls").and_then(Value::as_array).into_iter().flatten() {
                    let function = call.get("function").unwrap_or(&Value::Null);
                    input.push(json!({
                        "type": "function_call",
                        "call_id": str_field(call, "id").unwrap_or(""),
                        "name": str_field(function, "name").unwrap_or(""),
                        "arguments": str_field(function, "arguments").unwrap_or("")
                    }));
                }
            }
        }
    }

    let mut out = json!({
        "model": model,
        "input": input,
        "stream": streaming,
    });
    if let Some(max) = request.get("max_tokens").or_else(|| request.get("max_completion_tokens")) {
        if !max.is_null() {
            out["max_output_tokens"] = max.clone();
        }
    }
    copy_fields(request, &mut out, SAMPLING_FIELDS);
    if let Some(tools) = request.get("tools").and_then(Value::as_array) {
        let tools: Vec<Value> = tools
            .iter()
            .filter_map(|tool| {
                let function = tool.get("function")?;
                Some(json!({
                    "type": "function",
                    "name": str_field(function, "name")?,
                    "description": str_field(function, "description").unwrap_or(""),
                    "parameters": function.get("parameters").cloned().unwrap_or_else(|| json!({"type": "object"}))
                }))
            })
            .collect();
        if !tools.is_empty() {
            out["tools"] = Value::Array(tools);
        }
    }
    out
}

fn responses_part(part: &Value, role: &str) -> Option<Value> {
    match block_type(part) {
        "text" => {
            let kind = if role == "assistant" { "output_text" } else { "input_text" };
            Some(json!({"type": kind, "text": str_field(part, "text").unwrap_or("")}))
        }
        "image_url" => {
            let url = part.get("image_url").and_then(|i| str_field(i, "url"))?;
            Some(json!({"type": "input_image", "image_url": url}))
        }
        _ => None,
    }
}
