//! Immutable call-chain record for one request's delegation tree.
//!
//! The context is threaded explicitly as a value through every function on
//! the delegation path: each hop derives a fresh copy-and-append child, so
//! sibling delegations running concurrently from the same parent can never
//! corrupt shared chain state. There is no global "current context".

use std::sync::Arc;

use super::bus::EventBus;
use serde_json::Value;

/// Call-chain + depth record, propagated through a request's async call tree.
///
/// Depth is defined as the chain length, so the `depth == len(chain)`
/// invariant holds by construction. Lifetime: one top-level request.
#[derive(Clone, Debug, Default)]
pub struct DelegationContext {
    chain: Arc<Vec<String>>,
    bus: Option<EventBus>,
}

impl DelegationContext {
    /// Root context for a new request: empty chain, depth 0.
    pub fn root(bus: Option<EventBus>) -> Self {
        Self {
            chain: Arc::new(Vec::new()),
            bus,
        }
    }

    /// Derive the child context for a hop to `agent`: copy + append, same bus.
    pub fn child(&self, agent: &str) -> Self {
        let mut chain = (*self.chain).clone();
        chain.push(agent.to_string());
        Self {
            chain: Arc::new(chain),
            bus: self.bus.clone(),
        }
    }

    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    pub fn depth(&self) -> usize {
        self.chain.len()
    }

    /// Last agent in the chain, or `"root"` at the top level.
    pub fn tail(&self) -> &str {
        self.chain.last().map(String::as_str).unwrap_or("root")
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.chain.iter().any(|a| a == agent)
    }

    /// Render the chain for error messages and telemetry, e.g.
    /// `root -> supervisor -> task`.
    pub fn render_chain(&self) -> String {
        let mut rendered = String::from("root");
        for agent in self.chain.iter() {
            rendered.push_str(" -> ");
            rendered.push_str(agent);
        }
        rendered
    }

    /// Emit a telemetry event on the tree's bus, if one is attached.
    pub fn emit(&self, event_type: &str, data: Value) {
        if let Some(bus) = &self.bus {
            bus.emit(event_type, data);
        }
    }

    pub fn bus(&self) -> Option<&EventBus> {
        self.bus.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn root_context_is_empty() {
        let ctx = DelegationContext::root(None);
        assert_eq!(ctx.depth(), 0);
        assert!(ctx.chain().is_empty());
        assert_eq!(ctx.tail(), "root");
        assert_eq!(ctx.render_chain(), "root");
    }

    #[test]
    fn child_appends_without_mutating_parent() {
        let root = DelegationContext::root(None);
        let child = root.child("supervisor");
        let grandchild = child.child("task");

        assert_eq!(root.depth(), 0);
        assert_eq!(child.depth(), 1);
        assert_eq!(grandchild.depth(), 2);
        assert_eq!(grandchild.chain(), ["supervisor", "task"]);
        assert_eq!(grandchild.tail(), "task");
        assert_eq!(grandchild.render_chain(), "root -> supervisor -> task");
    }

    #[test]
    fn depth_always_equals_chain_length() {
        let mut ctx = DelegationContext::root(None);
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            ctx = ctx.child(name);
            assert_eq!(ctx.depth(), i + 1);
            assert_eq!(ctx.depth(), ctx.chain().len());
        }
    }

    #[test]
    fn sibling_children_are_independent() {
        let parent = DelegationContext::root(None).child("supervisor");
        let a = parent.child("weather");
        let b = parent.child("news");

        assert_eq!(a.chain(), ["supervisor", "weather"]);
        assert_eq!(b.chain(), ["supervisor", "news"]);
        assert_eq!(parent.chain(), ["supervisor"]);
    }

    #[test]
    fn emit_without_bus_is_a_no_op() {
        let ctx = DelegationContext::root(None);
        ctx.emit("delegate:start", json!({}));
    }

    #[test]
    fn children_share_the_parent_bus() {
        let bus = EventBus::new();
        let log = std::sync::Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let _sub = bus.subscribe(move |event_type, _| {
            log_clone.lock().unwrap().push(event_type.to_string());
        });

        let ctx = DelegationContext::root(Some(bus)).child("a").child("b");
        ctx.emit("delegate:start", json!({}));
        assert_eq!(log.lock().unwrap().as_slice(), ["delegate:start"]);
    }
}
