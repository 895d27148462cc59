//! Delegation safety layer.
//!
//! One request's call tree carries an immutable [`DelegationContext`] (agent
//! chain + depth) and an optional per-tree [`EventBus`] for telemetry. Every
//! delegation hop goes through the [`ExecutionGuard`], which enforces the
//! safety invariants against the read-only [`WorkerRegistry`] before any
//! generation call is made.

pub mod bus;
pub mod context;
pub mod guard;
pub mod registry;

pub use bus::{EventBus, Subscription};
pub use context::DelegationContext;
pub use guard::{ExecutionGuard, TaskResult, WorkerOutput, MAX_DELEGATION_DEPTH};
pub use registry::{WorkerRegistration, WorkerRegistry};
