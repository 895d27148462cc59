//! Generation-oracle contract.
//!
//! The rest of the crate treats text generation as an opaque capability:
//! given a prompt, an optional tool set, and a turn budget, it returns text,
//! tool invocations, and usage statistics -- in full via [`Oracle::complete`]
//! or incrementally via [`Oracle::stream`]. The production implementation
//! ([`ollama::OllamaOracle`]) speaks Ollama's HTTP API; tests script the
//! trait directly with [`testing::ScriptedOracle`].

pub mod ollama;
pub mod testing;

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OracleError;

/// A tool the oracle may invoke during one generation turn.
#[derive(Clone, Debug, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: Value,
}

/// Input to one generation call.
#[derive(Clone, Debug, Default)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub tools: Vec<ToolSpec>,
    pub max_turns: u32,
}

impl GenerationRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            tools: Vec::new(),
            max_turns: 1,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// One tool invocation captured from a generation turn.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
}

/// Token/cost accounting for one or more generation calls.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageInfo {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    pub duration_ms: u64,
}

impl UsageInfo {
    /// Element-wise accumulate token counts and cost.
    ///
    /// `duration_ms` is deliberately not summed: aggregate duration is a
    /// wall-clock span owned by the caller, since parallel sub-tasks overlap.
    pub fn absorb(&mut self, other: &UsageInfo) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        self.cost_usd = match (self.cost_usd, other.cost_usd) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
        };
    }
}

/// Complete (non-streaming) output of one generation call.
#[derive(Clone, Debug, Default)]
pub struct GenerationOutput {
    pub text: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub usage: UsageInfo,
}

impl GenerationOutput {
    /// Names of every tool invoked during the call, in invocation order.
    pub fn tool_call_names(&self) -> Vec<String> {
        self.tool_calls.iter().map(|c| c.name.clone()).collect()
    }
}

/// One incremental event from a streaming generation call.
///
/// The oracle guarantees generation order: tool-call/tool-result pairs are
/// emitted in the order the model produced them, interleaved with text
/// deltas, and `Finish` arrives exactly once at the end.
#[derive(Clone, Debug)]
pub enum OracleEvent {
    TextDelta(String),
    ToolCall { name: String, arguments: Value },
    ToolResult { name: String, output: Value },
    Finish { usage: UsageInfo },
}

/// Boxed stream of oracle events.
pub type OracleStream = Pin<Box<dyn Stream<Item = Result<OracleEvent, OracleError>> + Send>>;

/// The generation capability, behind a trait so the orchestration and
/// transport layers never depend on a concrete provider.
#[async_trait::async_trait]
pub trait Oracle: Send + Sync {
    /// Run one generation call to completion.
    async fn complete(&self, request: GenerationRequest) -> Result<GenerationOutput, OracleError>;

    /// Run one generation call, yielding events incrementally.
    async fn stream(&self, request: GenerationRequest) -> Result<OracleStream, OracleError>;
}
