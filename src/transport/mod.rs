//! Transport layer: one internal pipeline, two deliveries.
//!
//! [`dispatch`] is the single entry point both transports share: it resolves
//! an allow-listed internal endpoint to a pipeline invocation and returns
//! the event stream plus a cancellation token. The SSE adapter frames the
//! stream over one HTTP response; the WebSocket bridge relays the same
//! stream message by message. Because both consume the same producer one
//! event at a time, their delivered order is identical for an equivalent
//! request.

pub mod bridge;
pub mod client;
pub mod sse;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::delegation::DelegationContext;
use crate::server::AppState;
use crate::stream::StreamEvent;

/// Internal endpoint path prefixes either transport may target. Anything
/// else is rejected, so the bridge can never be used as an open relay.
pub const ALLOWED_ENDPOINT_PREFIXES: &[&str] = &["/api/agents/", "/api/generate", "/api/tools/"];

pub fn endpoint_allowed(endpoint: &str) -> bool {
    ALLOWED_ENDPOINT_PREFIXES
        .iter()
        .any(|prefix| endpoint.starts_with(prefix))
}

/// Resolve an endpoint and spawn its pipeline, returning the event stream
/// and the token that aborts the pipeline on client disconnect.
pub fn dispatch(
    state: Arc<AppState>,
    endpoint: &str,
    body: Value,
) -> Result<(ReceiverStream<StreamEvent>, CancellationToken), TransportError> {
    if !endpoint_allowed(endpoint) {
        return Err(TransportError::EndpointNotAllowed {
            endpoint: endpoint.to_string(),
        });
    }

    let query = body["query"]
        .as_str()
        .ok_or_else(|| TransportError::MalformedMessage("body must carry a 'query' string".into()))?
        .to_string();

    let (tx, rx) = mpsc::channel(100);
    let cancel = CancellationToken::new();

    let task_cancel = cancel.clone();
    let endpoint = endpoint.to_string();
    tokio::spawn(async move {
        tokio::select! {
            _ = task_cancel.cancelled() => {
                tracing::debug!(endpoint, "pipeline cancelled by client disconnect");
            }
            _ = run_endpoint(state, &endpoint, &query, &tx) => {}
        }
    });

    Ok((ReceiverStream::new(rx), cancel))
}

/// Run the pipeline flavor an endpoint names, rendering oracle failures as
/// a user-visible `status` line (the stream then ends without `done`).
async fn run_endpoint(
    state: Arc<AppState>,
    endpoint: &str,
    query: &str,
    tx: &mpsc::Sender<StreamEvent>,
) {
    // Per-request telemetry tree: delegate events surface as debug logs.
    let bus = crate::delegation::EventBus::new();
    let _telemetry = bus.subscribe(|event_type, data| {
        tracing::debug!(event = event_type, %data, "delegation telemetry");
    });
    let ctx = DelegationContext::root(Some(bus));

    let outcome = if let Some(name) = endpoint.strip_prefix("/api/agents/") {
        match state.registry.get(name) {
            Some(worker) if worker.is_orchestrator => {
                state.pipeline.respond_orchestrated(&ctx, query, tx).await
            }
            // Unknown names fall through to the guard, which folds the
            // rejection into an error-shaped result.
            _ => {
                state.pipeline.respond_single(&ctx, name, query, tx).await;
                Ok(())
            }
        }
    } else if let Some(tool) = endpoint.strip_prefix("/api/tools/") {
        match worker_for_tool(&state, tool) {
            Some(agent) => {
                state.pipeline.respond_single(&ctx, &agent, query, tx).await;
                Ok(())
            }
            None => {
                let _ = tx
                    .send(StreamEvent::status(format!("error: no worker exposes tool '{tool}'")))
                    .await;
                Ok(())
            }
        }
    } else {
        state.pipeline.respond_generate(query, tx).await
    };

    if let Err(e) = outcome {
        tracing::error!(endpoint, error = %e, "pipeline failed");
        let _ = tx.send(StreamEvent::status(format!("error: {e}"))).await;
    }
}

/// Map a tool name to the specialist that exposes it.
fn worker_for_tool(state: &AppState, tool: &str) -> Option<String> {
    state
        .registry
        .specialists()
        .iter()
        .find(|w| w.tool_names.iter().any(|t| t == tool))
        .map(|w| w.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_accepts_agent_generate_and_tool_endpoints() {
        assert!(endpoint_allowed("/api/agents/weather"));
        assert!(endpoint_allowed("/api/agents/supervisor"));
        assert!(endpoint_allowed("/api/generate"));
        assert!(endpoint_allowed("/api/tools/get_forecast"));
    }

    #[test]
    fn allow_list_rejects_everything_else() {
        assert!(!endpoint_allowed("/api/admin"));
        assert!(!endpoint_allowed("/etc/passwd"));
        assert!(!endpoint_allowed("http://evil.example/relay"));
        assert!(!endpoint_allowed(""));
        assert!(!endpoint_allowed("/api/agent/weather"));
    }
}
