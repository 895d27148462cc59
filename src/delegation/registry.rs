//! Process-wide worker registry.
//!
//! Built once at startup by an explicit constructor and read-only
//! thereafter, so concurrent readers never race. There is no self
//! registration: every worker is handed to [`WorkerRegistry::new`]
//! explicitly and the registry value is injected into the components that
//! need it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::OracleError;
use crate::oracle::{GenerationOutput, GenerationRequest, Oracle};

/// One named specialist worker (or orchestrator entry).
///
/// The generation capability is shared: each worker wraps the process-wide
/// oracle with its own system prompt and turn budget. The tool names are
/// descriptive -- they advertise what the worker can do to the planner and
/// to the guard's no-tools check; tool execution happens inside the
/// worker's generation call.
pub struct WorkerRegistration {
    pub name: String,
    pub description: String,
    pub tool_names: Vec<String>,
    pub is_orchestrator: bool,
    pub system_prompt: String,
    pub max_turns: u32,
    oracle: Arc<dyn Oracle>,
}

impl WorkerRegistration {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        tool_names: Vec<String>,
        system_prompt: impl Into<String>,
        oracle: Arc<dyn Oracle>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tool_names,
            is_orchestrator: false,
            system_prompt: system_prompt.into(),
            max_turns: 5,
            oracle,
        }
    }

    /// Flag this registration as an orchestrator. Orchestrators route
    /// top-level requests and are never valid delegation targets.
    pub fn orchestrator(mut self) -> Self {
        self.is_orchestrator = true;
        self
    }

    pub fn has_tools(&self) -> bool {
        !self.tool_names.is_empty()
    }

    /// Run one generation call for this worker against the given query.
    pub async fn generate(&self, query: &str) -> Result<GenerationOutput, OracleError> {
        let mut request = GenerationRequest::new(self.system_prompt.clone(), query);
        request.max_turns = self.max_turns;
        self.oracle.complete(request).await
    }
}

// Manual impl: the oracle handle has no useful Debug form.
impl std::fmt::Debug for WorkerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistration")
            .field("name", &self.name)
            .field("tool_names", &self.tool_names)
            .field("is_orchestrator", &self.is_orchestrator)
            .field("max_turns", &self.max_turns)
            .finish()
    }
}

/// Read-only lookup table of every registered worker.
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<WorkerRegistration>>,
}

impl WorkerRegistry {
    /// Build the registry once at startup. Later registrations by name
    /// silently replace earlier ones, so callers should use unique names.
    pub fn new(workers: Vec<WorkerRegistration>) -> Self {
        Self {
            workers: workers
                .into_iter()
                .map(|w| (w.name.clone(), Arc::new(w)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkerRegistration>> {
        self.workers.get(name).cloned()
    }

    /// Every non-orchestrator, tool-bearing worker -- the set the planner
    /// may propose sub-tasks for. Sorted by name for stable prompts.
    pub fn specialists(&self) -> Vec<Arc<WorkerRegistration>> {
        let mut workers: Vec<_> = self
            .workers
            .values()
            .filter(|w| !w.is_orchestrator && w.has_tools())
            .cloned()
            .collect();
        workers.sort_by(|a, b| a.name.cmp(&b.name));
        workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::testing::{ScriptedOracle, text_output};

    fn worker(name: &str, tools: &[&str], oracle: Arc<dyn Oracle>) -> WorkerRegistration {
        WorkerRegistration::new(
            name,
            format!("{name} specialist"),
            tools.iter().map(|t| t.to_string()).collect(),
            "You are a specialist.",
            oracle,
        )
    }

    #[test]
    fn specialists_exclude_orchestrators_and_toolless_workers() {
        let oracle: Arc<dyn Oracle> = Arc::new(ScriptedOracle::new());
        let registry = WorkerRegistry::new(vec![
            worker("weather", &["get_forecast"], oracle.clone()),
            worker("news", &["get_headlines"], oracle.clone()),
            worker("chitchat", &[], oracle.clone()),
            worker("supervisor", &["route"], oracle.clone()).orchestrator(),
        ]);

        let names: Vec<_> = registry
            .specialists()
            .iter()
            .map(|w| w.name.clone())
            .collect();
        assert_eq!(names, vec!["news", "weather"]);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn registration_debug_names_the_worker() {
        let oracle: Arc<dyn Oracle> = Arc::new(ScriptedOracle::new());
        let w = worker("weather", &["get_forecast"], oracle);
        let rendered = format!("{w:?}");
        assert!(rendered.contains("weather"));
        assert!(rendered.contains("get_forecast"));
    }

    #[tokio::test]
    async fn worker_generate_uses_its_own_system_prompt() {
        let oracle = Arc::new(ScriptedOracle::new().push_completion(text_output("sunny", 7)));
        let w = WorkerRegistration::new(
            "weather",
            "weather specialist",
            vec!["get_forecast".into()],
            "You answer weather questions.",
            oracle.clone(),
        );

        let output = w.generate("forecast for Oslo?").await.unwrap();
        assert_eq!(output.text, "sunny");

        let requests = oracle.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].system_prompt, "You answer weather questions.");
        assert_eq!(requests[0].user_prompt, "forecast for Oslo?");
    }
}
