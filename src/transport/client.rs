//! Consumer-side transport selection.
//!
//! A client prefers the WebSocket bridge (duplex, reusable) but must never
//! be stranded by it: [`run_with_fallback`] opens the secondary transport
//! and, if it fails to produce even one event, replays the request over the
//! primary SSE endpoint. The caller sees a single event stream either way;
//! a fallback is marked by exactly one synthetic `status` event at the
//! front of the replayed stream.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;

/// One event as delivered on either wire.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEvent {
    pub event: String,
    pub data: Value,
}

impl WireEvent {
    pub fn is_done(&self) -> bool {
        self.event == "done"
    }
}

pub type WireStream = BoxStream<'static, Result<WireEvent, TransportError>>;

/// A transport a client can open a request stream over.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn open(&self, endpoint: &str, body: Value) -> Result<WireStream, TransportError>;
}

/// Message inserted at the front of a replayed stream so consumers can tell
/// a fallback happened.
pub fn fallback_notice() -> WireEvent {
    WireEvent {
        event: "status".to_string(),
        data: json!({ "message": "secondary transport unavailable; replaying over primary" }),
    }
}

/// Open `secondary` and stream from it; if it fails to connect, errors
/// before the first event, or ends without yielding anything, replay the
/// request over `primary` with a single synthetic `status` event prefixed.
///
/// The first-event probe is the commit point: once the secondary has
/// delivered one event, later failures surface as stream errors rather
/// than a silent re-run of a pipeline with side effects.
pub async fn run_with_fallback(
    secondary: &dyn EventSource,
    primary: &dyn EventSource,
    endpoint: &str,
    body: Value,
) -> Result<WireStream, TransportError> {
    match secondary.open(endpoint, body.clone()).await {
        Ok(mut events) => match events.next().await {
            Some(Ok(first)) => Ok(stream::iter([Ok(first)]).chain(events).boxed()),
            Some(Err(e)) => {
                tracing::warn!(endpoint, error = %e, "secondary transport failed before first event; falling back");
                replay_over(primary, endpoint, body).await
            }
            None => {
                tracing::warn!(endpoint, "secondary transport yielded no events; falling back");
                replay_over(primary, endpoint, body).await
            }
        },
        Err(e) => {
            tracing::warn!(endpoint, error = %e, "secondary transport unavailable; falling back");
            replay_over(primary, endpoint, body).await
        }
    }
}

async fn replay_over(
    primary: &dyn EventSource,
    endpoint: &str,
    body: Value,
) -> Result<WireStream, TransportError> {
    let events = primary.open(endpoint, body).await?;
    Ok(stream::iter([Ok(fallback_notice())]).chain(events).boxed())
}

/// Incremental parser for `text/event-stream` bytes. Frames may arrive
/// split across arbitrary chunk boundaries; comment lines (the padding
/// prelude included) are dropped.
#[derive(Debug, Default)]
pub struct SseFrameParser {
    buf: String,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every complete frame it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<WireEvent> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();
        while let Some(split) = self.buf.find("\n\n") {
            let block = self.buf[..split].to_string();
            self.buf.drain(..split + 2);
            if let Some(event) = parse_frame(&block) {
                events.push(event);
            }
        }
        events
    }
}

/// Parse one blank-line-delimited block. Blocks made only of comments or
/// missing an event name (heartbeats, padding) yield nothing.
fn parse_frame(block: &str) -> Option<WireEvent> {
    let mut event = None;
    let mut data = String::new();
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(name) = line.strip_prefix("event: ") {
            event = Some(name.trim().to_string());
        } else if let Some(payload) = line.strip_prefix("data: ") {
            data.push_str(payload);
        }
    }
    let event = event?;
    let data = serde_json::from_str(&data).unwrap_or(Value::Null);
    Some(WireEvent { event, data })
}

/// Primary transport client: POST to an SSE endpoint and parse the body.
pub struct SseEventSource {
    http: reqwest::Client,
    base_url: String,
}

impl SseEventSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl EventSource for SseEventSource {
    async fn open(&self, endpoint: &str, body: Value) -> Result<WireStream, TransportError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?
            .error_for_status()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let chunks = response.bytes_stream();
        let events = stream::unfold(
            (chunks, SseFrameParser::new(), Vec::new()),
            |(mut chunks, mut parser, mut pending)| async move {
                loop {
                    if !pending.is_empty() {
                        let event = pending.remove(0);
                        return Some((Ok(event), (chunks, parser, pending)));
                    }
                    match chunks.next().await {
                        Some(Ok(chunk)) => pending = parser.push(&chunk),
                        Some(Err(e)) => {
                            return Some((
                                Err(TransportError::Connection(e.to_string())),
                                (chunks, parser, pending),
                            ));
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(events.boxed())
    }
}

/// Secondary transport client: authenticate over the bridge, send one
/// request, and surface the relayed messages.
pub struct WsEventSource {
    url: String,
    key: String,
}

impl WsEventSource {
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl EventSource for WsEventSource {
    async fn open(&self, endpoint: &str, body: Value) -> Result<WireStream, TransportError> {
        let (mut ws, _) = connect_async(&self.url)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let auth = json!({ "type": "auth", "key": self.key }).to_string();
        ws.send(Message::Text(auth.into()))
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let ack = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Connection(e.to_string())),
                None => return Err(TransportError::Connection("bridge closed during auth".into())),
            }
        };
        let ack: Value = serde_json::from_str(&ack)
            .map_err(|e| TransportError::MalformedMessage(e.to_string()))?;
        if ack["type"] != "auth" || ack["success"] != true {
            return Err(TransportError::AuthFailed);
        }

        let request = json!({ "type": "request", "endpoint": endpoint, "body": body }).to_string();
        ws.send(Message::Text(request.into()))
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let events = stream::unfold(ws, |mut ws| async move {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Some((parse_bridge_message(&text), ws));
                    }
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        return Some((Err(TransportError::Connection(e.to_string())), ws));
                    }
                }
            }
        });
        Ok(events.boxed())
    }
}

/// Decode one relayed bridge message into a wire event; `error` messages
/// become stream errors.
fn parse_bridge_message(text: &str) -> Result<WireEvent, TransportError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| TransportError::MalformedMessage(e.to_string()))?;
    if value["type"] == "error" {
        let error = value["error"].as_str().unwrap_or("unknown bridge error");
        return Err(TransportError::Connection(error.to_string()));
    }
    let event = value["event"]
        .as_str()
        .ok_or_else(|| TransportError::MalformedMessage("missing 'event' field".into()))?
        .to_string();
    Ok(WireEvent {
        event,
        data: value.get("data").cloned().unwrap_or(Value::Null),
    })
}
