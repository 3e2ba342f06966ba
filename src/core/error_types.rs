//! Shared constants for structured API errors.
//!
//! The sanitizer catalogue and the streaming error frames both draw their
//! `type`, `code` and `message` strings from here so the two never drift.

pub const ERROR_TYPE_API: &str = "api_error";
pub const ERROR_TYPE_INVALID_REQUEST: &str = "invalid_request_error";
pub const ERROR_TYPE_AUTHENTICATION: &str = "authentication_error";
pub const ERROR_TYPE_PERMISSION: &str = "permission_error";
pub const ERROR_TYPE_NOT_FOUND: &str = "not_found_error";
pub const ERROR_TYPE_RATE_LIMIT: &str = "rate_limit_error";
pub const ERROR_TYPE_SERVER: &str = "server_error";
pub const ERROR_TYPE_STREAM: &str = "stream_error";

pub const ERROR_CODE_INVALID_API_KEY: &str = "invalid_api_key";
pub const ERROR_CODE_PERMISSION_DENIED: &str = "permission_denied";
pub const ERROR_CODE_NOT_FOUND: &str = "not_found";
pub const ERROR_CODE_RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";

pub const MESSAGE_BAD_REQUEST: &str = "Bad request";
pub const MESSAGE_AUTHENTICATION_FAILED: &str = "Authentication failed";
pub const MESSAGE_ACCESS_DENIED: &str = "Access denied";
pub const MESSAGE_NOT_FOUND: &str = "Resource not found";
pub const MESSAGE_RATE_LIMITED: &str = "Rate limit exceeded";
pub const MESSAGE_UPSTREAM_UNAVAILABLE: &str = "Upstream service unavailable";
pub const MESSAGE_REQUEST_FAILED: &str = "Request failed";
pub const MESSAGE_STREAM_INTERRUPTED: &str = "Stream interrupted";
pub const MESSAGE_PARSE_FAILED: &str = "failed to parse response";
