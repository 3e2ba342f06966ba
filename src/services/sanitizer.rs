//! Upstream error sanitization.
//!
//! Non-2xx upstream bodies are logged for operators and replaced with a
//! fixed, externally safe payload keyed by status class.

use crate::core::error_types::*;
use crate::core::metrics::get_metrics;
use crate::transformer::Dialect;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

const MAX_LOGGED_BODY_CHARS: usize = 300;
const MAX_LOGGED_MESSAGE_CHARS: usize = 200;

/// A safe error document plus the status it should be served with.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedError {
    pub status: StatusCode,
    pub body: Value,
}

impl SanitizedError {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.body).unwrap_or_default()
    }
}

impl IntoResponse for SanitizedError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Catalogue entry for one status class.
struct CatalogueEntry {
    message: &'static str,
    error_type: &'static str,
    code: Option<&'static str>,
}

fn catalogue(status: u16) -> CatalogueEntry {
    let (message, error_type, code) = match status {
        400 => (MESSAGE_BAD_REQUEST, ERROR_TYPE_INVALID_REQUEST, None),
        401 => (
            MESSAGE_AUTHENTICATION_FAILED,
            ERROR_TYPE_AUTHENTICATION,
            Some(ERROR_CODE_INVALID_API_KEY),
        ),
        403 => (
            MESSAGE_ACCESS_DENIED,
            ERROR_TYPE_PERMISSION,
            Some(ERROR_CODE_PERMISSION_DENIED),
        ),
        404 => (MESSAGE_NOT_FOUND, ERROR_TYPE_NOT_FOUND, Some(ERROR_CODE_NOT_FOUND)),
        429 => (
            MESSAGE_RATE_LIMITED,
            ERROR_TYPE_RATE_LIMIT,
            Some(ERROR_CODE_RATE_LIMIT_EXCEEDED),
        ),
        500 | 502 | 503 | 504 => (MESSAGE_UPSTREAM_UNAVAILABLE, ERROR_TYPE_SERVER, None),
        _ => (MESSAGE_REQUEST_FAILED, ERROR_TYPE_API, None),
    };
    CatalogueEntry {
        message,
        error_type,
        code,
    }
}

/// Render a catalogue entry in the given dialect.
fn render(dialect: Dialect, entry: &CatalogueEntry) -> Value {
    match dialect {
        Dialect::Messages => {
            // the message-block dialect has no server_error type
            let error_type = if entry.error_type == ERROR_TYPE_SERVER {
                ERROR_TYPE_API
            } else {
                entry.error_type
            };
            json!({
                "type": "error",
                "error": {
                    "type": error_type,
                    "message": entry.message
                }
            })
        }
        Dialect::ChatCompletions | Dialect::Responses => json!({
            "error": {
                "message": entry.message,
                "type": entry.error_type,
                "code": entry.code
            }
        }),
    }
}

/// Log the untouched upstream error and return the safe replacement.
pub fn sanitize(dialect: Dialect, status: u16, original_body: &[u8]) -> SanitizedError {
    let raw = String::from_utf8_lossy(original_body);
    tracing::error!(
        status = status,
        dialect = %dialect,
        upstream_body = %truncate_for_log(&raw),
        "Upstream returned an error status"
    );
    get_metrics()
        .upstream_errors
        .with_label_values(&[&status.to_string()])
        .inc();

    let entry = catalogue(status);
    let served_status = if (400..=599).contains(&status) {
        StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
    } else {
        StatusCode::BAD_GATEWAY
    };

    SanitizedError {
        status: served_status,
        body: render(dialect, &entry),
    }
}

/// Error frame emitted when the upstream stream breaks after output began.
pub fn stream_interrupted(dialect: Dialect) -> Value {
    match dialect {
        Dialect::Messages => json!({
            "type": "error",
            "error": {
                "type": ERROR_TYPE_STREAM,
                "message": MESSAGE_STREAM_INTERRUPTED
            }
        }),
        Dialect::ChatCompletions | Dialect::Responses => json!({
            "error": {
                "message": MESSAGE_STREAM_INTERRUPTED,
                "type": ERROR_TYPE_STREAM,
                "code": Value::Null
            }
        }),
    }
}

/// Shorten an upstream body for logging, preferring the `"message":` part.
fn truncate_for_log(raw: &str) -> String {
    if let Some(pos) = raw.find("\"message\":") {
        let tail = &raw[pos..];
        return take_chars(tail, "\"message\":".len() + MAX_LOGGED_MESSAGE_CHARS);
    }
    take_chars(raw, MAX_LOGGED_BODY_CHARS)
}

fn take_chars(text: &str, limit: usize) -> String {
    let mut chars = text.chars();
    let truncated: String = chars.by_ref().take(limit).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_chat_catalogue() {
        let cases = [
            (400, MESSAGE_BAD_REQUEST, ERROR_TYPE_INVALID_REQUEST),
            (401, MESSAGE_AUTHENTICATION_FAILED, ERROR_TYPE_AUTHENTICATION),
            (403, MESSAGE_ACCESS_DENIED, ERROR_TYPE_PERMISSION),
            (404, MESSAGE_NOT_FOUND, ERROR_TYPE_NOT_FOUND),
            (429, MESSAGE_RATE_LIMITED, ERROR_TYPE_RATE_LIMIT),
            (500, MESSAGE_UPSTREAM_UNAVAILABLE, ERROR_TYPE_SERVER),
            (502, MESSAGE_UPSTREAM_UNAVAILABLE, ERROR_TYPE_SERVER),
            (503, MESSAGE_UPSTREAM_UNAVAILABLE, ERROR_TYPE_SERVER),
            (504, MESSAGE_UPSTREAM_UNAVAILABLE, ERROR_TYPE_SERVER),
            (418, MESSAGE_REQUEST_FAILED, ERROR_TYPE_API),
        ];
        for (status, message, error_type) in cases {
            let sanitized = sanitize(Dialect::ChatCompletions, status, b"boom");
            assert_eq!(sanitized.status.as_u16(), status);
            assert_eq!(sanitized.body["error"]["message"], message);
            assert_eq!(sanitized.body["error"]["type"], error_type);
        }
    }

    #[test]
    fn test_chat_codes() {
        let sanitized = sanitize(Dialect::ChatCompletions, 401, b"{}");
        assert_eq!(sanitized.body["error"]["code"], ERROR_CODE_INVALID_API_KEY);
        let sanitized = sanitize(Dialect::ChatCompletions, 500, b"{}");
        assert!(sanitized.body["error"]["code"].is_null());
    }

    #[test]
    fn test_messages_shape() {
        let sanitized = sanitize(Dialect::Messages, 503, b"upstream exploded");
        assert_eq!(sanitized.body["type"], "error");
        assert_eq!(sanitized.body["error"]["type"], ERROR_TYPE_API);
        assert_eq!(sanitized.body["error"]["message"], MESSAGE_UPSTREAM_UNAVAILABLE);

        let sanitized = sanitize(Dialect::Messages, 429, b"slow down");
        assert_eq!(sanitized.body["error"]["type"], ERROR_TYPE_RATE_LIMIT);
    }

    #[test]
    fn test_upstream_text_never_forwarded() {
        let body = br#"{"error":{"message":"vendor-internal trace at node-7","type":"factory_error"}}"#;
        for status in [400, 401, 403, 404, 429, 500, 502, 503, 504, 520] {
            for dialect in [Dialect::ChatCompletions, Dialect::Messages] {
                let rendered = sanitize(dialect, status, body).body.to_string();
                assert!(!rendered.contains("vendor-internal"));
                assert!(!rendered.contains("factory_error"));
            }
        }
    }

    #[test]
    fn test_non_error_status_served_as_bad_gateway() {
        let sanitized = sanitize(Dialect::ChatCompletions, 302, b"");
        assert_eq!(sanitized.status, StatusCode::BAD_GATEWAY);
        assert_eq!(sanitized.body["error"]["message"], MESSAGE_REQUEST_FAILED);
    }

    #[test]
    fn test_truncate_for_log_prefers_message() {
        let body = format!(r#"{{"padding":"{}","message":"short"}}"#, "x".repeat(400));
        let logged = truncate_for_log(&body);
        assert!(logged.starts_with("\"message\":"));
        assert!(logged.contains("short"));
    }

    #[test]
    fn test_truncate_for_log_plain() {
        let body = "y".repeat(500);
        let logged = truncate_for_log(&body);
        assert_eq!(logged.len(), MAX_LOGGED_BODY_CHARS + 3);
        assert!(logged.ends_with("..."));
    }

    #[test]
    fn test_stream_interrupted_frames() {
        let messages = stream_interrupted(Dialect::Messages);
        assert_eq!(messages["error"]["type"], ERROR_TYPE_STREAM);
        let chat = stream_interrupted(Dialect::ChatCompletions);
        assert_eq!(chat["error"]["message"], MESSAGE_STREAM_INTERRUPTED);
    }
}
