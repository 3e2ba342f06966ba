//! Upstream forwarding client.
//!
//! One pooled HTTP client, built on first use and shared by every call. The
//! target coordinates live behind an [`ArcSwapOption`] so they can be swapped
//! without locking while calls are in flight.

use crate::core::{AppError, Result};
use arc_swap::ArcSwapOption;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;

const POOL_MAX_IDLE_PER_HOST: usize = 10;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);
const HTTP2_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const HTTP2_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where calls go and how they authenticate.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    pub base_url: String,
    pub credential: String,
}

/// An immutable description of one upstream request.
#[derive(Debug, Clone)]
pub struct UpstreamCall {
    /// Path appended to the base URL, e.g. `/v1/messages`
    pub endpoint: String,
    pub body: Bytes,
    pub streaming: bool,
}

impl UpstreamCall {
    pub fn new(endpoint: impl Into<String>, body: impl Into<Bytes>, streaming: bool) -> Self {
        Self {
            endpoint: endpoint.into(),
            body: body.into(),
            streaming,
        }
    }
}

/// Raw upstream answer. The body is still on the wire; exactly one handler
/// consumes it.
pub struct UpstreamResult {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: BoxStream<'static, Result<Bytes>>,
}

impl UpstreamResult {
    pub fn new(status: StatusCode, headers: HeaderMap, body: BoxStream<'static, Result<Bytes>>) -> Self {
        Self { status, headers, body }
    }

    /// A result whose body is already in memory.
    pub fn from_bytes(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self::new(status, HeaderMap::new(), stream::once(async move { Ok::<_, AppError>(body) }).boxed())
    }

    /// A result whose body arrives as the given chunks.
    pub fn from_chunks<I>(status: StatusCode, chunks: I) -> Self
    where
        I: IntoIterator<Item = Result<Bytes>>,
        I::IntoIter: Send + 'static,
    {
        Self::new(status, HeaderMap::new(), stream::iter(chunks).boxed())
    }

    pub fn into_body(self) -> BoxStream<'static, Result<Bytes>> {
        self.body
    }

    /// Read the remaining body into memory.
    pub async fn into_bytes(self) -> Result<Bytes> {
        let mut body = self.body;
        let mut buffer = Vec::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buffer))
    }
}

impl std::fmt::Debug for UpstreamResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResult")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Pooled client for the configured upstream.
pub struct UpstreamClient {
    http: OnceCell<reqwest::Client>,
    target: ArcSwapOption<UpstreamTarget>,
    verify_ssl: bool,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new(true)
    }
}

impl UpstreamClient {
    pub fn new(verify_ssl: bool) -> Self {
        Self {
            http: OnceCell::new(),
            target: ArcSwapOption::empty(),
            verify_ssl,
        }
    }

    /// Set (or replace) the upstream coordinates.
    pub fn configure(&self, base_url: impl Into<String>, credential: impl Into<String>) {
        let base_url = base_url.into();
        tracing::info!(base_url = %base_url, "Upstream configured");
        self.target.store(Some(Arc::new(UpstreamTarget {
            base_url,
            credential: credential.into(),
        })));
    }

    pub fn is_configured(&self) -> bool {
        self.target.load().is_some()
    }

    fn http(&self) -> Result<&reqwest::Client> {
        self.http.get_or_try_init(|| {
            reqwest::Client::builder()
                .danger_accept_invalid_certs(!self.verify_ssl)
                .min_tls_version(reqwest::tls::Version::TLS_1_2)
                .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
                .pool_idle_timeout(POOL_IDLE_TIMEOUT)
                .tcp_keepalive(TCP_KEEPALIVE)
                .http2_keep_alive_interval(HTTP2_KEEPALIVE_INTERVAL)
                .http2_keep_alive_timeout(HTTP2_KEEPALIVE_TIMEOUT)
                .build()
                .map_err(AppError::from)
        })
    }

    /// Issue the call. Transport failures are logged in full and surface as
    /// [`AppError::Upstream`]; the body is handed back unread.
    pub async fn forward(&self, call: &UpstreamCall) -> Result<UpstreamResult> {
        let target = self.target.load_full().ok_or(AppError::NotConfigured)?;
        let url = join_url(&target.base_url, &call.endpoint);

        let mut request = self
            .http()?
            .post(&url)
            .bearer_auth(&target.credential)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(call.body.clone());
        if call.streaming {
            request = request.header(reqwest::header::ACCEPT, "text/event-stream");
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(
                url = %url,
                error = %e,
                is_timeout = e.is_timeout(),
                is_connect = e.is_connect(),
                "HTTP request failed to upstream"
            );
            AppError::from(e)
        })?;

        let status =
            StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let headers = convert_headers(response.headers());
        tracing::debug!(url = %url, status = %status, streaming = call.streaming, "Upstream responded");

        let body = response.bytes_stream().map(|chunk| chunk.map_err(AppError::from)).boxed();
        Ok(UpstreamResult::new(status, headers, body))
    }
}

/// Join an endpoint path onto a base URL without doubling a trailing `/v1`.
pub fn join_url(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let endpoint = if endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        format!("/{}", endpoint)
    };
    match (base.ends_with("/v1"), endpoint.strip_prefix("/v1/")) {
        (true, Some(rest)) => format!("{}/{}", base, rest),
        _ => format!("{}{}", base, endpoint),
    }
}

// reqwest is on http 0.2, axum on http 1.
fn convert_headers(source: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(source.len());
    for (name, value) in source {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }
    headers
}
