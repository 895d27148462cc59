//! Scripted oracle for tests.
//!
//! Kept in-tree (not behind `cfg(test)`) so integration tests under `tests/`
//! can drive the full pipeline without a network. Each call pops the next
//! scripted response; an exhausted script is a test bug and surfaces as a
//! `GenerationFailed` error.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use super::{
    GenerationOutput, GenerationRequest, Oracle, OracleEvent, OracleStream, ToolInvocation,
    UsageInfo,
};
use crate::error::OracleError;

/// An oracle that replays pre-scripted outputs in order.
#[derive(Default)]
pub struct ScriptedOracle {
    completions: Mutex<VecDeque<Result<GenerationOutput, String>>>,
    streams: Mutex<VecDeque<Vec<Result<OracleEvent, String>>>>,
    delay: Option<Duration>,
    /// Every request received, in call order.
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful completion.
    pub fn push_completion(self, output: GenerationOutput) -> Self {
        self.completions.lock().unwrap().push_back(Ok(output));
        self
    }

    /// Queue a failing completion.
    pub fn push_failure(self, message: impl Into<String>) -> Self {
        self.completions.lock().unwrap().push_back(Err(message.into()));
        self
    }

    /// Queue a scripted event stream.
    pub fn push_stream(self, events: Vec<OracleEvent>) -> Self {
        self.streams
            .lock()
            .unwrap()
            .push_back(events.into_iter().map(Ok).collect());
        self
    }

    /// Inject an artificial delay before every call completes. Used by the
    /// aggregation-law tests to prove sub-tasks overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, request: GenerationRequest) -> Result<GenerationOutput, OracleError> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.completions.lock().unwrap().pop_front();
        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(OracleError::GenerationFailed(message)),
            None => Err(OracleError::GenerationFailed(
                "scripted oracle exhausted".to_string(),
            )),
        }
    }

    async fn stream(&self, request: GenerationRequest) -> Result<OracleStream, OracleError> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.streams.lock().unwrap().pop_front();
        match next {
            Some(events) => Ok(futures::stream::iter(events)
                .map(|e| e.map_err(OracleError::GenerationFailed))
                .boxed()),
            None => Err(OracleError::GenerationFailed(
                "scripted oracle exhausted".to_string(),
            )),
        }
    }
}

/// Build a text-only output with the given token count.
pub fn text_output(text: impl Into<String>, total_tokens: u64) -> GenerationOutput {
    GenerationOutput {
        text: text.into(),
        tool_calls: Vec::new(),
        usage: usage(total_tokens),
    }
}

/// Build an output whose tool calls are `propose_task` invocations for the
/// given `(agent, query)` pairs.
pub fn proposal_output(pairs: &[(&str, &str)], total_tokens: u64) -> GenerationOutput {
    GenerationOutput {
        text: String::new(),
        tool_calls: pairs
            .iter()
            .map(|(agent, query)| ToolInvocation {
                name: "propose_task".to_string(),
                arguments: json!({ "agent": agent, "query": query }),
            })
            .collect(),
        usage: usage(total_tokens),
    }
}

/// Build a usage record where all tokens are counted as output.
pub fn usage(total_tokens: u64) -> UsageInfo {
    UsageInfo {
        input_tokens: 0,
        output_tokens: total_tokens,
        total_tokens,
        cost_usd: None,
        duration_ms: 0,
    }
}
