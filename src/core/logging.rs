//! Request-scoped logging context.
//!
//! Every inbound call runs inside [`REQUEST_ID`] so log lines emitted deep in
//! the transcoder can be tied back to the request without threading the id
//! through every function.

tokio::task_local! {
    /// Task-local storage for the current request ID.
    pub static REQUEST_ID: String;
}

/// Header carrying the request id in and out of the relay.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Get the current request ID from context, if set.
///
/// Returns an empty string if no request ID is set.
pub fn get_request_id() -> String {
    REQUEST_ID.try_with(|id| id.clone()).unwrap_or_default()
}

/// Generate a new unique request ID using UUID v4.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Pick the caller-supplied request id, or mint a fresh one.
pub fn request_id_from_headers(headers: &axum::http::HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(generate_request_id)
}
