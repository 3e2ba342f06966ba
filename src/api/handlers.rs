//! HTTP request handlers for the relay API.
//!
//! Both relay endpoints share one flow: adapt the request body for the
//! upstream dialect, forward it, then hand the upstream result to the
//! streaming or whole-body transcoder for the caller's dialect.

use crate::api::streaming::sse_response;
use crate::api::upstream::{UpstreamCall, UpstreamClient};
use crate::core::logging::{request_id_from_headers, REQUEST_ID, REQUEST_ID_HEADER};
use crate::core::metrics::{get_metrics, render_metrics};
use crate::core::{AppError, Result};
use crate::services::redaction::RedactionPipeline;
use crate::services::usage::{LoggingUsageSink, UsageSink};
use crate::transformer::request::adapt_request;
use crate::transformer::response::can_transcode_document;
use crate::transformer::{handle_non_stream, handle_stream, Dialect, StreamReply, TranscodeContext};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RedactionPipeline>,
    pub upstream: Arc<UpstreamClient>,
    /// Dialect the configured upstream speaks
    pub upstream_dialect: Dialect,
    /// Forwarded in place of the caller's model when set
    pub upstream_model: Option<String>,
    pub usage_sink: Arc<dyn UsageSink>,
}

impl AppState {
    pub fn new(pipeline: RedactionPipeline, upstream: UpstreamClient, upstream_dialect: Dialect) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            upstream: Arc::new(upstream),
            upstream_dialect,
            upstream_model: None,
            usage_sink: Arc::new(LoggingUsageSink),
        }
    }

    pub fn with_upstream_model(mut self, model: Option<String>) -> Self {
        self.upstream_model = model;
        self
    }

    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = sink;
        self
    }
}

/// `POST /v1/chat/completions`
pub async fn chat_completions(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    relay(state, headers, body, Dialect::ChatCompletions, "/v1/chat/completions").await
}

/// `POST /v1/messages`
pub async fn messages(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    relay(state, headers, body, Dialect::Messages, "/v1/messages").await
}

async fn relay(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: Bytes,
    client: Dialect,
    endpoint: &'static str,
) -> Response {
    let request_id = request_id_from_headers(&headers);
    let started = Instant::now();

    let mut response = REQUEST_ID
        .scope(request_id.clone(), async {
            match relay_call(&state, &body, client, &request_id).await {
                Ok(response) => response,
                Err(e) => e.into_dialect_response(client),
            }
        })
        .await;

    let status = response.status();
    get_metrics()
        .request_count
        .with_label_values(&[endpoint, status.as_str()])
        .inc();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    tracing::info!(
        request_id = %request_id,
        endpoint = endpoint,
        status = status.as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request handled"
    );
    response
}

async fn relay_call(state: &AppState, body: &[u8], client: Dialect, request_id: &str) -> Result<Response> {
    let upstream = state.upstream_dialect;
    let adapted = adapt_request(body, client, upstream, state.upstream_model.as_deref())?;
    if !adapted.streaming && !can_transcode_document(upstream, client) {
        return Err(AppError::BadRequest(format!(
            "Non-streaming {} requests are not supported by a {} upstream",
            client, upstream
        )));
    }

    tracing::debug!(
        request_id = %request_id,
        client = %client,
        upstream = %upstream,
        model = %adapted.client_model,
        stream = adapted.streaming,
        "Forwarding request"
    );

    let ctx = TranscodeContext::new(upstream, client, adapted.client_model.clone()).with_request_id(request_id);
    let call = UpstreamCall::new(upstream.upstream_path(), adapted.body, adapted.streaming);
    let result = state.upstream.forward(&call).await?;

    if adapted.streaming {
        let reply = handle_stream(result, ctx, state.pipeline.clone(), state.usage_sink.clone()).await;
        Ok(match reply {
            StreamReply::Events(frames) => sse_response(frames),
            StreamReply::Error(error) => error.into_response(),
        })
    } else {
        let handled = handle_non_stream(result, &ctx, &state.pipeline, state.usage_sink.as_ref()).await?;
        Ok(handled.into_response())
    }
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "upstream_configured": state.upstream.is_configured()
    }))
}

/// `GET /metrics`
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_metrics(),
    )
}
