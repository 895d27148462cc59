//! Primary transport: unidirectional event push over one HTTP response.
//!
//! Each event is framed as `event: <name>` / `data: <json>` separated by a
//! blank line; the connection closes after `done` or on producer failure.
//! Before the first real event the adapter writes an inert padding block of
//! SSE comment lines, large enough to push intermediary response buffers
//! past their flush thresholds so subsequent events are delivered eagerly.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{Path, State};
use axum::http::{self, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::dispatch;
use crate::error::TransportError;
use crate::server::AppState;
use crate::stream::StreamEvent;

/// Channel-backed `text/event-stream` response body.
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);

        http::Response::builder()
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .body(body)
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

/// Frame one event for the wire.
pub fn frame_event(event: &StreamEvent) -> String {
    format!("event: {}\ndata: {}\n\n", event.name(), event.payload())
}

/// Build the anti-buffering prelude: comment lines totalling at least
/// `bytes` bytes. Comments are ignored by SSE consumers.
pub fn padding_prelude(bytes: usize) -> String {
    if bytes == 0 {
        return String::new();
    }
    let line = format!(": {}\n", "p".repeat(62));
    let mut prelude = String::with_capacity(bytes + line.len() + 1);
    while prelude.len() < bytes {
        prelude.push_str(&line);
    }
    prelude.push('\n');
    prelude
}

/// POST /api/agents/{name}
pub async fn reply_agent(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<SseResponse, StatusCode> {
    serve_stream(state, format!("/api/agents/{name}"), body)
}

/// POST /api/generate
pub async fn reply_generate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<SseResponse, StatusCode> {
    serve_stream(state, "/api/generate".to_string(), body)
}

/// POST /api/tools/{tool}
pub async fn reply_tool(
    State(state): State<Arc<AppState>>,
    Path(tool): Path<String>,
    Json(body): Json<Value>,
) -> Result<SseResponse, StatusCode> {
    serve_stream(state, format!("/api/tools/{tool}"), body)
}

/// Dispatch the endpoint and pump its events into an SSE body. A failed
/// send means the client went away; the pipeline is cancelled and the
/// forwarding task exits.
fn serve_stream(
    state: Arc<AppState>,
    endpoint: String,
    body: Value,
) -> Result<SseResponse, StatusCode> {
    let padding = padding_prelude(state.config.padding_bytes);
    let (mut events, cancel) = dispatch(state, &endpoint, body).map_err(|e| match e {
        TransportError::EndpointNotAllowed { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    })?;

    let (tx, rx) = mpsc::channel::<String>(100);
    tokio::spawn(async move {
        if !padding.is_empty() && tx.send(padding).await.is_err() {
            cancel.cancel();
            return;
        }
        while let Some(event) = events.next().await {
            let is_done = event.is_done();
            if tx.send(frame_event(&event)).await.is_err() {
                tracing::debug!(endpoint, "client disconnected; cancelling pipeline");
                cancel.cancel();
                return;
            }
            if is_done {
                break;
            }
        }
    });

    Ok(SseResponse::new(ReceiverStream::new(rx)))
}
