//! Canonical, transport-independent event sequence.
//!
//! Every response -- whatever transport carries it -- is an ordered sequence
//! of [`StreamEvent`]s framed as `(event-name, json-payload)` pairs. `done`
//! is always the last event of a stream and carries the aggregated usage
//! plus a conversation identifier.

pub mod producer;

use serde_json::{Value, json};

use crate::oracle::UsageInfo;

/// One unit of the canonical ordered output sequence.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Coarse lifecycle signal (`planning`, `executing`, `synthesizing`,
    /// error renderings, transport fallback notices).
    Status { message: String },
    /// One increment of live-streamed text, in strict generation order.
    TextDelta { delta: String },
    /// A tool invocation, never reordered relative to its result or to
    /// surrounding text deltas.
    ToolCall { name: String, arguments: Value },
    /// The result of the matching tool call.
    ToolResult { name: String, output: Value },
    /// Domain-specific classification payload for peripheral workflows.
    Classification { payload: Value },
    /// Domain-specific proposal payload for peripheral workflows.
    Proposal { payload: Value },
    /// Terminal event: aggregated usage + conversation identifier.
    Done {
        usage: UsageInfo,
        conversation_id: String,
    },
}

impl StreamEvent {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    /// Wire name for the `event:` line / bridge `event` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::TextDelta { .. } => "text-delta",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::Classification { .. } => "classification",
            Self::Proposal { .. } => "proposal",
            Self::Done { .. } => "done",
        }
    }

    /// JSON payload for the `data:` line / bridge `data` field.
    pub fn payload(&self) -> Value {
        match self {
            Self::Status { message } => json!({ "message": message }),
            Self::TextDelta { delta } => json!({ "delta": delta }),
            Self::ToolCall { name, arguments } => {
                json!({ "name": name, "arguments": arguments })
            }
            Self::ToolResult { name, output } => json!({ "name": name, "output": output }),
            Self::Classification { payload } => payload.clone(),
            Self::Proposal { payload } => payload.clone(),
            Self::Done {
                usage,
                conversation_id,
            } => json!({
                "usage": usage,
                "conversationId": conversation_id,
            }),
        }
    }

    /// Reconstruct an event from its wire form. Used by the fallback client,
    /// which consumes both transports' framings.
    pub fn from_wire(name: &str, data: &Value) -> Option<Self> {
        match name {
            "status" => Some(Self::Status {
                message: data["message"].as_str().unwrap_or_default().to_string(),
            }),
            "text-delta" => Some(Self::TextDelta {
                delta: data["delta"].as_str().unwrap_or_default().to_string(),
            }),
            "tool-call" => Some(Self::ToolCall {
                name: data["name"].as_str().unwrap_or_default().to_string(),
                arguments: data["arguments"].clone(),
            }),
            "tool-result" => Some(Self::ToolResult {
                name: data["name"].as_str().unwrap_or_default().to_string(),
                output: data["output"].clone(),
            }),
            "classification" => Some(Self::Classification {
                payload: data.clone(),
            }),
            "proposal" => Some(Self::Proposal {
                payload: data.clone(),
            }),
            "done" => Some(Self::Done {
                usage: serde_json::from_value(data["usage"].clone()).unwrap_or_default(),
                conversation_id: data["conversationId"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            }),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}
