//! Plan -> execute -> synthesize pipeline.
//!
//! **Plan**: one generation call whose system prompt enumerates every
//! registered, non-orchestrator, tool-bearing worker, plus a declarative
//! `propose_task` tool the oracle may invoke any number of times in a
//! single turn. Zero proposals short-circuits with the oracle's free text:
//! decomposition is never forced.
//!
//! **Execute**: every proposed `(agent, query)` pair runs through the
//! execution guard concurrently. The guard is infallible by contract, so
//! joining always yields exactly N results for N proposals.
//!
//! **Synthesize**: one further generation call (no tools), fed every
//! sub-task's agent/query/response plus the original query. Its output is
//! the only live-streamed text; plan and execute phases surface as coarse
//! `status` events.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::json;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use crate::delegation::{DelegationContext, ExecutionGuard, TaskResult, WorkerRegistry};
use crate::error::OracleError;
use crate::oracle::{GenerationOutput, GenerationRequest, Oracle, ToolSpec, UsageInfo};
use crate::stream::producer::{RelayEnd, produce_into, relay_oracle_stream};
use crate::stream::StreamEvent;

/// Tool the planning call uses to propose sub-tasks.
const PROPOSE_TASK: &str = "propose_task";

/// One `(agent, query)` pair proposed by the planning call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanProposal {
    pub agent: String,
    pub query: String,
}

/// Final output of a non-streaming pipeline run.
#[derive(Debug)]
pub struct OrchestratorOutput {
    pub text: String,
    /// Sub-task results in proposal order; empty when the plan phase
    /// short-circuited with a direct answer.
    pub tasks: Vec<TaskResult>,
    pub usage: UsageInfo,
}

/// The plan/execute/synthesize orchestrator.
pub struct Pipeline {
    registry: Arc<WorkerRegistry>,
    guard: ExecutionGuard,
    oracle: Arc<dyn Oracle>,
}

impl Pipeline {
    pub fn new(registry: Arc<WorkerRegistry>, guard: ExecutionGuard, oracle: Arc<dyn Oracle>) -> Self {
        Self {
            registry,
            guard,
            oracle,
        }
    }

    /// Run the full pipeline to completion without streaming.
    pub async fn run(
        &self,
        ctx: &DelegationContext,
        query: &str,
    ) -> Result<OrchestratorOutput, OracleError> {
        let started = Instant::now();
        let (proposals, plan_output) = self.plan(query).await?;
        let mut usage = plan_output.usage.clone();

        if proposals.is_empty() {
            usage.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(OrchestratorOutput {
                text: plan_output.text,
                tasks: Vec::new(),
                usage,
            });
        }

        let tasks = self.execute(ctx, &proposals).await;
        for task in &tasks {
            if let Some(task_usage) = &task.result.usage {
                usage.absorb(task_usage);
            }
        }

        let synthesis = self
            .oracle
            .complete(self.synthesis_request(query, &tasks))
            .await?;
        usage.absorb(&synthesis.usage);
        usage.duration_ms = started.elapsed().as_millis() as u64;

        Ok(OrchestratorOutput {
            text: synthesis.text,
            tasks,
            usage,
        })
    }

    /// Run the full pipeline, streaming into `tx`.
    ///
    /// Plan and execute phases surface only as `status` events; synthesis
    /// deltas stream live; exactly one `done` closes the sequence. Oracle
    /// failures propagate for the transport boundary to render.
    pub async fn respond_orchestrated(
        &self,
        ctx: &DelegationContext,
        query: &str,
        tx: &Sender<StreamEvent>,
    ) -> Result<(), OracleError> {
        let started = Instant::now();
        let conversation_id = Uuid::new_v4().to_string();

        let _ = tx.send(StreamEvent::status("planning")).await;
        let (proposals, plan_output) = self.plan(query).await?;
        let mut usage = plan_output.usage.clone();

        if proposals.is_empty() {
            // Direct answer: no decomposition.
            let _ = tx
                .send(StreamEvent::TextDelta {
                    delta: plan_output.text,
                })
                .await;
            usage.duration_ms = started.elapsed().as_millis() as u64;
            let _ = tx
                .send(StreamEvent::Done {
                    usage,
                    conversation_id,
                })
                .await;
            return Ok(());
        }

        let _ = tx.send(StreamEvent::status("executing")).await;
        let tasks = self.execute(ctx, &proposals).await;
        for task in &tasks {
            if let Some(task_usage) = &task.result.usage {
                usage.absorb(task_usage);
            }
        }

        let _ = tx.send(StreamEvent::status("synthesizing")).await;
        let stream = self
            .oracle
            .stream(self.synthesis_request(query, &tasks))
            .await?;
        match relay_oracle_stream(stream, tx).await? {
            RelayEnd::Finished(synth_usage) => usage.absorb(&synth_usage),
            RelayEnd::Exhausted => {}
            RelayEnd::SinkClosed => return Ok(()),
        }

        usage.duration_ms = started.elapsed().as_millis() as u64;
        let _ = tx
            .send(StreamEvent::Done {
                usage,
                conversation_id,
            })
            .await;
        Ok(())
    }

    /// Stream a single-worker invocation: one guarded hop, its text relayed
    /// as a single delta. The guard absorbs all failures, so this never
    /// errors.
    pub async fn respond_single(
        &self,
        ctx: &DelegationContext,
        agent: &str,
        query: &str,
        tx: &Sender<StreamEvent>,
    ) {
        let started = Instant::now();
        let conversation_id = Uuid::new_v4().to_string();

        let _ = tx.send(StreamEvent::status("executing")).await;
        let task = self.guard.delegate(ctx, agent, query).await;

        let mut usage = task.result.usage.clone().unwrap_or_default();
        usage.duration_ms = started.elapsed().as_millis() as u64;

        let _ = tx
            .send(StreamEvent::TextDelta {
                delta: task.result.text,
            })
            .await;
        let _ = tx
            .send(StreamEvent::Done {
                usage,
                conversation_id,
            })
            .await;
    }

    /// Stream a plain generation call with no planning or delegation.
    pub async fn respond_generate(
        &self,
        query: &str,
        tx: &Sender<StreamEvent>,
    ) -> Result<(), OracleError> {
        let request = GenerationRequest::new(
            "You are a helpful assistant. Answer the user's question directly.",
            query,
        );
        let stream = self.oracle.stream(request).await?;
        produce_into(stream, tx, UsageInfo::default(), Uuid::new_v4().to_string()).await
    }

    /// Plan phase: collect `(agent, query)` proposals from one generation
    /// turn. Malformed proposals are skipped with a warning rather than
    /// failing the request.
    async fn plan(&self, query: &str) -> Result<(Vec<PlanProposal>, GenerationOutput), OracleError> {
        let request = GenerationRequest::new(self.plan_system_prompt(), query)
            .with_tools(vec![propose_task_spec()]);
        let output = self.oracle.complete(request).await?;

        let mut proposals = Vec::new();
        for call in &output.tool_calls {
            if call.name != PROPOSE_TASK {
                continue;
            }
            match (
                call.arguments["agent"].as_str(),
                call.arguments["query"].as_str(),
            ) {
                (Some(agent), Some(task_query)) => proposals.push(PlanProposal {
                    agent: agent.to_string(),
                    query: task_query.to_string(),
                }),
                _ => {
                    tracing::warn!(arguments = %call.arguments, "skipping malformed task proposal");
                }
            }
        }

        tracing::debug!(proposals = proposals.len(), "plan phase complete");
        Ok((proposals, output))
    }

    /// Execute phase: fan out every proposal through the guard, join on all
    /// settling. Always exactly N results for N proposals.
    async fn execute(&self, ctx: &DelegationContext, proposals: &[PlanProposal]) -> Vec<TaskResult> {
        join_all(
            proposals
                .iter()
                .map(|p| self.guard.delegate(ctx, &p.agent, &p.query)),
        )
        .await
    }

    fn plan_system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You coordinate a team of specialist workers. Decide whether the \
             user's request should be decomposed into sub-tasks.\n\n\
             ## Workers\n\n",
        );
        for worker in self.registry.specialists() {
            prompt.push_str(&format!(
                "- **{}**: {} (tools: {})\n",
                worker.name,
                worker.description,
                worker.tool_names.join(", ")
            ));
        }
        prompt.push_str(
            "\n## Instructions\n\n\
             Call `propose_task` once per sub-task you want executed, naming \
             the worker and the query to send it. You may call it any number \
             of times in this turn. If the request needs no decomposition, \
             answer it directly in plain text instead.\n",
        );
        prompt
    }

    fn synthesis_request(&self, query: &str, tasks: &[TaskResult]) -> GenerationRequest {
        let mut user_prompt = format!("Original question: {query}\n\n## Sub-task results\n\n");
        for task in tasks {
            user_prompt.push_str(&format!(
                "### {} (asked: {})\n{}\n\n",
                task.agent, task.query, task.result.text
            ));
        }
        GenerationRequest::new(
            "Combine the sub-task results below into one coherent answer to \
             the original question. If a sub-task failed, work around it and \
             answer with what is available.",
            user_prompt,
        )
    }
}

/// Declarative schema for the planning tool.
fn propose_task_spec() -> ToolSpec {
    ToolSpec {
        name: PROPOSE_TASK.to_string(),
        description: "Propose one sub-task: a worker to delegate to and the query to send it."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "agent": { "type": "string", "description": "Name of the worker" },
                "query": { "type": "string", "description": "Query for the worker" },
            },
            "required": ["agent", "query"],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::{WorkerRegistration, MAX_DELEGATION_DEPTH};
    use crate::oracle::OracleEvent;
    use crate::oracle::testing::{ScriptedOracle, proposal_output, text_output, usage};
    use std::time::Duration;

    fn worker(name: &str, tools: &[&str], oracle: Arc<dyn Oracle>) -> WorkerRegistration {
        WorkerRegistration::new(
            name,
            format!("{name} specialist"),
            tools.iter().map(|t| t.to_string()).collect(),
            "You are a specialist.",
            oracle,
        )
    }

    fn pipeline_with(oracle: Arc<ScriptedOracle>) -> Pipeline {
        let shared: Arc<dyn Oracle> = oracle;
        let registry = Arc::new(WorkerRegistry::new(vec![
            worker("weather", &["get_forecast"], shared.clone()),
            worker("news", &["get_headlines"], shared.clone()),
            worker("movies", &["find_movies"], shared.clone()),
        ]));
        let guard = ExecutionGuard::new(registry.clone(), MAX_DELEGATION_DEPTH);
        Pipeline::new(registry, guard, shared)
    }

    #[tokio::test]
    async fn zero_proposals_short_circuits_with_direct_answer() {
        let oracle = Arc::new(ScriptedOracle::new().push_completion(text_output("42.", 11)));
        let pipeline = pipeline_with(oracle);

        let ctx = DelegationContext::root(None);
        let output = pipeline.run(&ctx, "what is 6 * 7?").await.unwrap();

        assert_eq!(output.text, "42.");
        assert!(output.tasks.is_empty());
        assert_eq!(output.usage.total_tokens, 11);
    }

    #[tokio::test]
    async fn fan_out_executes_all_proposals_and_aggregates_usage() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .push_completion(proposal_output(
                    &[("weather", "forecast?"), ("news", "headlines?")],
                    10,
                ))
                .push_completion(text_output("sunny", 20))
                .push_completion(text_output("quiet day", 30))
                .push_completion(text_output("Sunny and quiet.", 40)),
        );
        let pipeline = pipeline_with(oracle);

        let ctx = DelegationContext::root(None);
        let output = pipeline.run(&ctx, "what's going on today?").await.unwrap();

        assert_eq!(output.text, "Sunny and quiet.");
        assert_eq!(output.tasks.len(), 2);
        // plan(10) + weather(20) + news(30) + synthesis(40)
        assert_eq!(output.usage.total_tokens, 100);
    }

    #[tokio::test]
    async fn failing_sub_task_degrades_but_never_fails_the_pipeline() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .push_completion(proposal_output(
                    &[
                        ("weather", "forecast?"),
                        ("news", "headlines?"),
                        ("movies", "what's showing?"),
                    ],
                    10,
                ))
                .push_completion(text_output("sunny", 20))
                .push_failure("provider exploded")
                .push_completion(text_output("two new releases", 30))
                .push_completion(text_output("partial answer", 40)),
        );
        let pipeline = pipeline_with(oracle);

        let ctx = DelegationContext::root(None);
        let output = pipeline.run(&ctx, "evening plans?").await.unwrap();

        // Synthesis still saw exactly three result blocks.
        assert_eq!(output.tasks.len(), 3);
        let failed: Vec<_> = output.tasks.iter().filter(|t| t.is_failure()).collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].result.text.starts_with("Error: "));
        // The failed sub-task contributes zero tokens.
        assert_eq!(output.usage.total_tokens, 100);
    }

    #[tokio::test]
    async fn wall_clock_duration_beats_serial_sum_for_parallel_tasks() {
        let delay = Duration::from_millis(50);
        let oracle = Arc::new(
            ScriptedOracle::new()
                .push_completion(proposal_output(&[("weather", "a"), ("news", "b")], 1))
                .push_completion(text_output("x", 1))
                .push_completion(text_output("y", 1))
                .push_completion(text_output("z", 1))
                .with_delay(delay),
        );
        let pipeline = pipeline_with(oracle);

        let ctx = DelegationContext::root(None);
        let output = pipeline.run(&ctx, "q").await.unwrap();

        // Four delayed calls ran, two of them concurrently: the wall-clock
        // span must be strictly below the serial sum.
        let serial_sum = delay.as_millis() as u64 * 4;
        assert!(
            output.usage.duration_ms < serial_sum,
            "duration {}ms not below serial {}ms",
            output.usage.duration_ms,
            serial_sum
        );
    }

    #[tokio::test]
    async fn streaming_run_emits_phase_statuses_then_synthesis_then_done() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .push_completion(proposal_output(&[("weather", "forecast?")], 5))
                .push_completion(text_output("sunny", 7))
                .push_stream(vec![
                    OracleEvent::TextDelta("All ".into()),
                    OracleEvent::TextDelta("clear.".into()),
                    OracleEvent::Finish { usage: usage(13) },
                ]),
        );
        let pipeline = pipeline_with(oracle);

        let (tx, mut rx) = tokio::sync::mpsc::channel(32);
        let ctx = DelegationContext::root(None);
        pipeline
            .respond_orchestrated(&ctx, "weather?", &tx)
            .await
            .unwrap();
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        let names: Vec<_> = events.iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec!["status", "status", "status", "text-delta", "text-delta", "done"]
        );
        assert_eq!(events[0], StreamEvent::status("planning"));
        assert_eq!(events[1], StreamEvent::status("executing"));
        assert_eq!(events[2], StreamEvent::status("synthesizing"));
        match events.last().unwrap() {
            StreamEvent::Done { usage, .. } => assert_eq!(usage.total_tokens, 25),
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_proposals_are_skipped() {
        let mut plan = proposal_output(&[("weather", "forecast?")], 5);
        plan.tool_calls.push(crate::oracle::ToolInvocation {
            name: PROPOSE_TASK.to_string(),
            arguments: json!({ "agent": "news" }), // missing query
        });
        let oracle = Arc::new(
            ScriptedOracle::new()
                .push_completion(plan)
                .push_completion(text_output("sunny", 1))
                .push_completion(text_output("done", 1)),
        );
        let pipeline = pipeline_with(oracle);

        let ctx = DelegationContext::root(None);
        let output = pipeline.run(&ctx, "q").await.unwrap();
        assert_eq!(output.tasks.len(), 1);
        assert_eq!(output.tasks[0].agent, "weather");
    }

    #[tokio::test]
    async fn single_agent_response_streams_text_and_done() {
        let oracle = Arc::new(ScriptedOracle::new().push_completion(text_output("rainy", 9)));
        let pipeline = pipeline_with(oracle);

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let ctx = DelegationContext::root(None);
        pipeline
            .respond_single(&ctx, "weather", "forecast?", &tx)
            .await;
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let names: Vec<_> = events.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["status", "text-delta", "done"]);
        assert_eq!(
            events[1],
            StreamEvent::TextDelta {
                delta: "rainy".into()
            }
        );
    }
}
