//! API layer for the relay.
//!
//! HTTP handlers, the SSE response builder and the upstream forwarding client.

pub mod handlers;
pub mod streaming;
pub mod upstream;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use handlers::{chat_completions, health, messages, metrics_handler, AppState};
pub use streaming::sse_response;
pub use upstream::{UpstreamCall, UpstreamClient, UpstreamResult};

/// Request bodies carry whole conversations (and inline images).
const MAX_REQUEST_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Routes of the relay, without the outer tower layers.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(messages))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .with_state(state)
}
