//! Execution guard: gatekeeper for every delegation hop.
//!
//! [`ExecutionGuard::delegate`] validates the hop against the registry and
//! the caller's [`DelegationContext`], then runs the target worker under a
//! derived child context. It never returns an error: validation failures
//! and worker failures are folded into an error-shaped [`TaskResult`], so a
//! caller fanning out N delegations always joins on exactly N results.

use std::sync::Arc;

use serde_json::json;

use super::context::DelegationContext;
use super::registry::{WorkerRegistration, WorkerRegistry};
use crate::error::DelegationError;
use crate::oracle::UsageInfo;

/// Default bound on delegation nesting.
pub const MAX_DELEGATION_DEPTH: usize = 3;

/// Characters of result text carried in `delegate:end` telemetry.
const SUMMARY_CHARS: usize = 200;

/// Outcome of one worker invocation, success- or error-shaped.
#[derive(Clone, Debug, serde::Serialize)]
pub struct WorkerOutput {
    pub text: String,
    pub tool_call_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageInfo>,
}

/// Result of one delegation hop. Always structurally complete: a failed hop
/// carries the standardized failure text and no usage.
#[derive(Clone, Debug, serde::Serialize)]
pub struct TaskResult {
    pub agent: String,
    pub query: String,
    pub result: WorkerOutput,
}

impl TaskResult {
    fn failed(agent: &str, query: &str, message: String) -> Self {
        Self {
            agent: agent.to_string(),
            query: query.to_string(),
            result: WorkerOutput {
                text: format!("Error: {message}"),
                tool_call_names: Vec::new(),
                usage: None,
            },
        }
    }

    /// Whether this hop produced the standardized failure shape.
    pub fn is_failure(&self) -> bool {
        self.result.usage.is_none()
    }
}

/// Validates and performs one delegation hop.
#[derive(Clone)]
pub struct ExecutionGuard {
    registry: Arc<WorkerRegistry>,
    max_depth: usize,
}

impl ExecutionGuard {
    pub fn new(registry: Arc<WorkerRegistry>, max_depth: usize) -> Self {
        Self {
            registry,
            max_depth,
        }
    }

    /// Check every safety invariant for a hop from `ctx` to `target`.
    ///
    /// Short-circuits on the first violation, in exactly this order:
    /// unknown worker, orchestrator target, no tools, depth limit,
    /// self-delegation, cycle. When an input violates several rules, the
    /// earliest check decides which error is reported.
    pub fn validate(
        &self,
        ctx: &DelegationContext,
        target: &str,
    ) -> Result<Arc<WorkerRegistration>, DelegationError> {
        let worker = self
            .registry
            .get(target)
            .ok_or_else(|| DelegationError::UnknownWorker {
                name: target.to_string(),
            })?;

        if worker.is_orchestrator {
            return Err(DelegationError::OrchestratorTarget {
                name: target.to_string(),
            });
        }

        if !worker.has_tools() {
            return Err(DelegationError::NoTools {
                name: target.to_string(),
            });
        }

        if ctx.depth() >= self.max_depth {
            return Err(DelegationError::DepthExceeded {
                max: self.max_depth,
                chain: ctx.render_chain(),
            });
        }

        if ctx.chain().last().map(String::as_str) == Some(target) {
            return Err(DelegationError::SelfDelegation {
                name: target.to_string(),
            });
        }

        if ctx.contains(target) {
            return Err(DelegationError::DelegationCycle {
                name: target.to_string(),
                chain: ctx.render_chain(),
            });
        }

        Ok(worker)
    }

    /// Perform one delegation hop. Infallible by contract: every failure is
    /// absorbed into an error-shaped [`TaskResult`].
    ///
    /// Safe for concurrent invocation from the same parent context -- each
    /// call derives its own child context, so sibling hops never share
    /// mutable chain state.
    pub async fn delegate(&self, ctx: &DelegationContext, target: &str, query: &str) -> TaskResult {
        let worker = match self.validate(ctx, target) {
            Ok(worker) => worker,
            Err(e) => {
                tracing::warn!(target, chain = %ctx.render_chain(), error = %e, "delegation rejected");
                return TaskResult::failed(target, query, e.to_string());
            }
        };

        let from = ctx.tail().to_string();
        ctx.emit(
            "delegate:start",
            json!({ "from": from, "to": target, "query": query }),
        );

        // Child context for the worker's own call tree. Derived per call, so
        // sibling delegations stay isolated.
        let child = ctx.child(target);

        let result = match worker.generate(query).await {
            Ok(output) => TaskResult {
                agent: target.to_string(),
                query: query.to_string(),
                result: WorkerOutput {
                    text: output.text.clone(),
                    tool_call_names: output.tool_call_names(),
                    usage: Some(output.usage),
                },
            },
            Err(e) => {
                tracing::warn!(target, error = %e, "worker generation failed");
                TaskResult::failed(target, query, e.to_string())
            }
        };

        child.emit(
            "delegate:end",
            json!({
                "from": from,
                "to": target,
                "summary": truncate_chars(&result.result.text, SUMMARY_CHARS),
            }),
        );

        result
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

/// Truncate to at most `max` characters, appending "..." when truncated.
/// Operates on char boundaries so multi-byte text never splits.
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
