//! Server-Sent Events response construction.

use crate::transformer::stream::FrameStream;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;

/// Wrap a frame stream in a `text/event-stream` response. Each frame is one
/// body chunk, so hyper flushes it as soon as it is produced.
pub fn sse_response(frames: FrameStream) -> Response {
    let mut response = Response::new(Body::from_stream(frames));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    // Disable proxy buffering (nginx) so frames reach the caller immediately
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream::{self, StreamExt};

    #[tokio::test]
    async fn test_sse_headers_and_body() {
        let frames = stream::iter(vec![Ok(Bytes::from("data: a\n\n")), Ok(Bytes::from("data: b\n\n"))]).boxed();
        let response = sse_response(frames);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"data: a\n\ndata: b\n\n");
    }
}
