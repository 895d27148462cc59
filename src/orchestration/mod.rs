//! Task planning and parallel execution.
//!
//! Implements the "fan out, then synthesize" pipeline: one planning call
//! proposes sub-tasks, the execution guard runs them concurrently, and one
//! synthesis call folds every result into the final answer.

pub mod planner;

pub use planner::{OrchestratorOutput, Pipeline, PlanProposal};
