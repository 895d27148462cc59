//! Secondary transport: duplex WebSocket bridge.
//!
//! Protocol, all JSON text messages:
//! 1. client -> server: `{"type":"auth","key":...}` -- required first; no
//!    work is accepted before a successful ack.
//! 2. server -> client: `{"type":"auth","success":...,"error"?:...}`.
//! 3. client -> server: `{"type":"request","endpoint":...,"body":...}` --
//!    executed against the same internal pipeline the SSE adapter uses
//!    (in-process call, no network hop).
//! 4. server -> client: one `{"event":...,"data":...}` message per produced
//!    event, in producer order; the socket closes after relaying `done`, an
//!    error, or stream end.
//!
//! Only allow-listed endpoint prefixes may be targeted; anything else is
//! rejected and the socket closed. Malformed/non-JSON messages get an error
//! reply but leave the socket open for retry.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};

use super::dispatch;
use crate::error::TransportError;
use crate::server::AppState;
use crate::stream::StreamEvent;

/// One parsed client message.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Auth {
        key: String,
    },
    Request {
        endpoint: String,
        #[serde(default)]
        body: Value,
    },
}

/// Parse a client text frame. Anything that is not valid JSON in one of the
/// two message shapes is a malformed message (recoverable).
pub fn parse_client_message(text: &str) -> Result<ClientMessage, TransportError> {
    serde_json::from_str(text).map_err(|e| TransportError::MalformedMessage(e.to_string()))
}

fn auth_ack(success: bool, error: Option<&str>) -> String {
    let mut ack = json!({ "type": "auth", "success": success });
    if let Some(error) = error {
        ack["error"] = json!(error);
    }
    ack.to_string()
}

fn error_message(error: &str) -> String {
    json!({ "type": "error", "error": error }).to_string()
}

fn event_message(event: &StreamEvent) -> String {
    json!({ "event": event.name(), "data": event.payload() }).to_string()
}

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    // Phase 1: authentication. Malformed frames keep the socket open;
    // a well-formed message that is not a successful auth closes it.
    loop {
        let Some(Ok(message)) = socket.recv().await else {
            return;
        };
        let Message::Text(text) = message else {
            continue;
        };
        match parse_client_message(&text) {
            Ok(ClientMessage::Auth { key }) => {
                if key == state.config.shared_secret {
                    let _ = socket.send(Message::Text(auth_ack(true, None).into())).await;
                    break;
                }
                tracing::warn!("bridge auth rejected");
                let _ = socket
                    .send(Message::Text(auth_ack(false, Some("invalid key")).into()))
                    .await;
                return;
            }
            Ok(ClientMessage::Request { .. }) => {
                let _ = socket
                    .send(Message::Text(error_message("authentication required").into()))
                    .await;
                return;
            }
            Err(e) => {
                let _ = socket
                    .send(Message::Text(error_message(&e.to_string()).into()))
                    .await;
            }
        }
    }

    // Phase 2: one request, then relay.
    let (endpoint, body) = loop {
        let Some(Ok(message)) = socket.recv().await else {
            return;
        };
        let Message::Text(text) = message else {
            continue;
        };
        match parse_client_message(&text) {
            Ok(ClientMessage::Request { endpoint, body }) => break (endpoint, body),
            Ok(ClientMessage::Auth { .. }) => {
                let _ = socket
                    .send(Message::Text(error_message("already authenticated").into()))
                    .await;
            }
            Err(e) => {
                let _ = socket
                    .send(Message::Text(error_message(&e.to_string()).into()))
                    .await;
            }
        }
    };

    let (mut events, cancel) = match dispatch(state, &endpoint, body) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(endpoint, error = %e, "bridge request rejected");
            let _ = socket
                .send(Message::Text(error_message(&e.to_string()).into()))
                .await;
            let _ = socket.close().await;
            return;
        }
    };

    // Relay one event per message, in producer order. The relayed sequence
    // is therefore identical to what the SSE adapter would deliver.
    while let Some(event) = events.next().await {
        let is_done = event.is_done();
        if socket
            .send(Message::Text(event_message(&event).into()))
            .await
            .is_err()
        {
            tracing::debug!(endpoint, "bridge client disconnected; cancelling pipeline");
            cancel.cancel();
            return;
        }
        if is_done {
            break;
        }
    }

    let _ = socket.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_auth_message() {
        let message = parse_client_message(r#"{"type":"auth","key":"s3cret"}"#).unwrap();
        assert_eq!(message, ClientMessage::Auth { key: "s3cret".into() });
    }

    #[test]
    fn parses_request_message_with_body() {
        let message = parse_client_message(
            r#"{"type":"request","endpoint":"/api/agents/supervisor","body":{"query":"hi"}}"#,
        )
        .unwrap();
        match message {
            ClientMessage::Request { endpoint, body } => {
                assert_eq!(endpoint, "/api/agents/supervisor");
                assert_eq!(body["query"], "hi");
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn malformed_messages_are_recoverable_errors() {
        let err = parse_client_message("not json at all").unwrap_err();
        assert!(matches!(err, TransportError::MalformedMessage(_)));

        let err = parse_client_message(r#"{"type":"launch"}"#).unwrap_err();
        assert!(matches!(err, TransportError::MalformedMessage(_)));
    }

    #[test]
    fn auth_ack_includes_error_only_on_failure() {
        let ok: Value = serde_json::from_str(&auth_ack(true, None)).unwrap();
        assert_eq!(ok["type"], "auth");
        assert_eq!(ok["success"], true);
        assert!(ok.get("error").is_none());

        let failed: Value = serde_json::from_str(&auth_ack(false, Some("invalid key"))).unwrap();
        assert_eq!(failed["success"], false);
        assert_eq!(failed["error"], "invalid key");
    }

    #[test]
    fn event_message_wraps_name_and_payload() {
        let message = event_message(&StreamEvent::TextDelta { delta: "x".into() });
        let parsed: Value = serde_json::from_str(&message).unwrap();
        assert_eq!(parsed["event"], "text-delta");
        assert_eq!(parsed["data"]["delta"], "x");
    }
}
