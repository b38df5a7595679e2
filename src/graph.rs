//! The graph runtime: stateful traversal with conditional edges, a bounded
//! iteration count, terminal nodes, and a crash barrier.
//!
//! A [`Graph`] is immutable after construction and shared across concurrent
//! requests; each request owns its [`State`]. Traversal starts at the entry
//! node and, after every non-terminal node returns, follows the first
//! outgoing edge whose predicate matches. A node error (or panic) records
//! `error`/`message` on the state and transfers control to the `fallback`
//! terminal, which always produces a well-formed final output.

use crate::error::{ErrorKind, Result};
use crate::state::{keys, State};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Node names of the standard agent graph.
pub mod nodes {
    pub const PARSE_INTENT: &str = "parse_intent";
    pub const RESOLVE_TARGET: &str = "resolve_target";
    pub const ROUTE_DECISION: &str = "route_decision";
    pub const ANALYSE_CONSEQUENCES: &str = "analyse_consequences";
    pub const CONFIRMATION_GATE: &str = "confirmation_gate";
    pub const WIZARD: &str = "wizard";
    pub const EXECUTE_ACTION: &str = "execute_action";
    pub const SUGGEST_ACTIONS: &str = "suggest_actions";
    pub const OFFER_SELECTION: &str = "offer_selection";
    pub const OFFER_CREATION: &str = "offer_creation";
    pub const REPORT_RESULT: &str = "report_result";
    pub const FALLBACK: &str = "fallback";
}

/// A single typed processing stage.
#[async_trait]
pub trait GraphNode: Send + Sync {
    /// Registered node name.
    fn name(&self) -> &'static str;

    /// Process the state and return the updated state. Errors are caught by
    /// the runtime's crash barrier, never propagated to the caller.
    async fn run(&self, state: State) -> Result<State>;
}

type Predicate = Box<dyn Fn(&State) -> bool + Send + Sync>;

/// An outgoing edge with an optional predicate. Unconditional edges match
/// unconditionally and must be registered last for their source node.
pub struct Edge {
    target: String,
    predicate: Option<Predicate>,
}

impl Edge {
    /// Unconditional edge.
    pub fn always(target: &str) -> Self {
        Self {
            target: target.to_string(),
            predicate: None,
        }
    }

    /// Edge taken when the predicate evaluates truthy.
    pub fn when<F>(target: &str, predicate: F) -> Self
    where
        F: Fn(&State) -> bool + Send + Sync + 'static,
    {
        Self {
            target: target.to_string(),
            predicate: Some(Box::new(predicate)),
        }
    }

    /// Edge taken when the routing key `next_node` names the target.
    pub fn when_routed(target: &str) -> Self {
        let name = target.to_string();
        let owned = name.clone();
        Self {
            target: name,
            predicate: Some(Box::new(move |state: &State| {
                state.get_str(keys::NEXT_NODE) == Some(owned.as_str())
            })),
        }
    }

    fn matches(&self, state: &State) -> bool {
        match &self.predicate {
            Some(p) => p(state),
            None => true,
        }
    }
}

/// Builder for [`Graph`]. Validates the topology at build time so traversal
/// never dangles.
pub struct GraphBuilder {
    nodes: HashMap<String, Arc<dyn GraphNode>>,
    edges: HashMap<String, Vec<Edge>>,
    entry: String,
    terminals: HashSet<String>,
    fallback: String,
    max_iterations: u32,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entry: nodes::PARSE_INTENT.to_string(),
            terminals: HashSet::new(),
            fallback: nodes::FALLBACK.to_string(),
            max_iterations: 20,
        }
    }

    pub fn node(mut self, node: Arc<dyn GraphNode>) -> Self {
        self.nodes.insert(node.name().to_string(), node);
        self
    }

    pub fn edge(mut self, from: &str, edge: Edge) -> Self {
        self.edges.entry(from.to_string()).or_default().push(edge);
        self
    }

    pub fn entry(mut self, name: &str) -> Self {
        self.entry = name.to_string();
        self
    }

    pub fn terminal(mut self, name: &str) -> Self {
        self.terminals.insert(name.to_string());
        self
    }

    /// The terminal that receives control after a node failure.
    pub fn fallback(mut self, name: &str) -> Self {
        self.fallback = name.to_string();
        self
    }

    pub fn max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn build(self) -> crate::error::Result<Graph> {
        if !self.nodes.contains_key(&self.entry) {
            return Err(crate::error::Error::Config(format!(
                "entry node '{}' is not registered",
                self.entry
            )));
        }
        if !self.nodes.contains_key(&self.fallback) {
            return Err(crate::error::Error::Config(format!(
                "fallback node '{}' is not registered",
                self.fallback
            )));
        }
        for (from, edges) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(crate::error::Error::Config(format!(
                    "edges registered for unknown node '{}'",
                    from
                )));
            }
            for (i, edge) in edges.iter().enumerate() {
                if !self.nodes.contains_key(&edge.target) {
                    return Err(crate::error::Error::Config(format!(
                        "edge {} -> {} targets an unregistered node",
                        from, edge.target
                    )));
                }
                if edge.predicate.is_none() && i + 1 != edges.len() {
                    return Err(crate::error::Error::Config(format!(
                        "unconditional edge from '{}' must be last",
                        from
                    )));
                }
            }
        }
        Ok(Graph {
            nodes: self.nodes,
            edges: self.edges,
            entry: self.entry,
            terminals: self.terminals,
            fallback: self.fallback,
            max_iterations: self.max_iterations,
        })
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable node registry plus edges; see module docs for traversal rules.
pub struct Graph {
    nodes: HashMap<String, Arc<dyn GraphNode>>,
    edges: HashMap<String, Vec<Edge>>,
    entry: String,
    terminals: HashSet<String>,
    fallback: String,
    max_iterations: u32,
}

impl Graph {
    /// Run the graph to completion. Never fails: any node error or panic is
    /// converted into a structured failure and routed through the fallback
    /// terminal, so the returned state always carries `final_output`.
    pub async fn run(&self, input: &State) -> State {
        let mut state = input.clone();
        let mut current = self.entry.clone();

        for iteration in 0..self.max_iterations {
            let Some(node) = self.nodes.get(&current) else {
                warn!(node = %current, "traversal reached unregistered node");
                state.set_error(ErrorKind::InternalError, ErrorKind::InternalError.user_message());
                if current == self.fallback {
                    break;
                }
                current = self.fallback.clone();
                continue;
            };

            debug!(node = %current, iteration, "running node");
            // The node takes the state by value; keep a copy so a panicking
            // node cannot destroy the request state.
            let attempt = AssertUnwindSafe(node.run(state.clone())).catch_unwind().await;

            match attempt {
                Ok(Ok(next)) => state = next,
                Ok(Err(err)) => {
                    warn!(node = %current, error = %err, "node returned an error");
                    state.set_error(err.kind(), err.user_message());
                    if current != self.fallback {
                        current = self.fallback.clone();
                        continue;
                    }
                    break;
                }
                Err(_) => {
                    warn!(node = %current, "node panicked");
                    state.set_error(ErrorKind::InternalError, ErrorKind::InternalError.user_message());
                    if current != self.fallback {
                        current = self.fallback.clone();
                        continue;
                    }
                    break;
                }
            }

            if self.terminals.contains(&current) {
                break;
            }

            let next = self
                .edges
                .get(&current)
                .and_then(|edges| edges.iter().find(|e| e.matches(&state)))
                .map(|e| e.target.clone());

            match next {
                Some(target) => {
                    // The routing key is consumed by the transition.
                    state.remove(keys::NEXT_NODE);
                    current = target;
                }
                None => {
                    warn!(node = %current, "no outgoing edge matched");
                    state.set_error(ErrorKind::InternalError, ErrorKind::InternalError.user_message());
                    current = self.fallback.clone();
                }
            }
        }

        if !state.contains(keys::FINAL_OUTPUT) {
            // Iteration bound exhausted or the fallback itself failed.
            self.emergency_output(&mut state);
        }
        state
    }

    fn emergency_output(&self, state: &mut State) {
        let action = state.get_str(keys::ACTION).unwrap_or("unknown").to_string();
        let message = state
            .get_str(keys::MESSAGE)
            .unwrap_or(ErrorKind::InternalError.user_message())
            .to_string();
        let error = state.error_kind().unwrap_or("internal_error").to_string();
        state.set(
            keys::FINAL_OUTPUT,
            serde_json::json!({
                "action": action,
                "status": "failed",
                "error": error,
                "message": message,
                "needs_confirmation": false,
            }),
        );
    }
}
