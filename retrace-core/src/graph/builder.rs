//! Graph construction API

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use super::compiled::CompiledGraph;
use super::{END, GraphError};

/// Boxed node function
pub type NodeFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, GraphError>> + Send + Sync>;

/// Boxed routing function returning an outcome label
pub type RouteFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// A node function together with a stable identity string.
///
/// The identity defaults to the Rust type name of the function, e.g.
/// `my_agent::nodes::fetch`, so it names the code rather than a pointer.
#[derive(Clone)]
pub struct NodeHandle {
    identity: String,
    func: NodeFn,
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("identity", &self.identity)
            .finish()
    }
}

impl NodeHandle {
    /// Wrap a node function, using its type name as identity
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, GraphError>> + Send + 'static,
    {
        Self::named(std::any::type_name::<F>(), func)
    }

    /// Wrap a node function with an explicit identity
    pub fn named<F, Fut>(identity: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, GraphError>> + Send + 'static,
    {
        Self {
            identity: identity.into(),
            func: Arc::new(move |state| -> BoxFuture<'static, Result<Value, GraphError>> {
                Box::pin(func(state))
            }),
        }
    }

    /// Rebuild a handle around an already boxed function
    pub fn from_fn(identity: impl Into<String>, func: NodeFn) -> Self {
        Self {
            identity: identity.into(),
            func,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn func(&self) -> NodeFn {
        self.func.clone()
    }

    /// Run the node on a state
    pub async fn call(&self, state: Value) -> Result<Value, GraphError> {
        (self.func)(state).await
    }
}

/// A routing function together with a stable identity string
#[derive(Clone)]
pub struct RouteHandle {
    identity: String,
    func: RouteFn,
}

impl std::fmt::Debug for RouteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteHandle")
            .field("identity", &self.identity)
            .finish()
    }
}

impl RouteHandle {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        Self::named(std::any::type_name::<F>(), func)
    }

    pub fn named<F>(identity: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        Self {
            identity: identity.into(),
            func: Arc::new(func),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Pick an outcome label for a state
    pub fn choose(&self, state: &Value) -> String {
        (self.func)(state)
    }
}

/// The four declarations a graph-construction API exposes
pub trait GraphBuilder {
    /// Declare a node
    fn add_node(&mut self, name: &str, node: NodeHandle) -> Result<(), GraphError>;

    /// Declare an unconditional edge
    fn add_edge(&mut self, source: &str, target: &str) -> Result<(), GraphError>;

    /// Declare a conditional edge: `route` picks a label, `mapping` maps labels to targets
    fn add_conditional_edges(
        &mut self,
        source: &str,
        route: RouteHandle,
        mapping: BTreeMap<String, String>,
    ) -> Result<(), GraphError>;

    /// Declare the node execution starts from
    fn set_entry_point(&mut self, name: &str) -> Result<(), GraphError>;
}

/// Graph under construction over JSON state
#[derive(Debug, Default)]
pub struct StateGraph {
    pub(super) nodes: HashMap<String, NodeHandle>,
    pub(super) edges: HashMap<String, String>,
    pub(super) conditionals: HashMap<String, (RouteHandle, BTreeMap<String, String>)>,
    pub(super) entry: Option<String>,
}

impl StateGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn has_outgoing(&self, source: &str) -> bool {
        self.edges.contains_key(source) || self.conditionals.contains_key(source)
    }

    fn check_target(&self, target: &str) -> Result<(), GraphError> {
        if target == END || self.nodes.contains_key(target) {
            Ok(())
        } else {
            Err(GraphError::UnknownNode(target.to_string()))
        }
    }

    /// Validate the declarations and produce an executable graph
    pub fn compile(self) -> Result<CompiledGraph, GraphError> {
        let entry = self.entry.clone().ok_or(GraphError::MissingEntryPoint)?;
        if !self.nodes.contains_key(&entry) {
            return Err(GraphError::UnknownNode(entry));
        }

        for (source, target) in &self.edges {
            if !self.nodes.contains_key(source) {
                return Err(GraphError::UnknownNode(source.clone()));
            }
            self.check_target(target)?;
        }
        for (source, (_, mapping)) in &self.conditionals {
            if !self.nodes.contains_key(source) {
                return Err(GraphError::UnknownNode(source.clone()));
            }
            for target in mapping.values() {
                self.check_target(target)?;
            }
        }

        Ok(CompiledGraph::new(
            entry,
            self.nodes,
            self.edges,
            self.conditionals,
        ))
    }
}

impl GraphBuilder for StateGraph {
    fn add_node(&mut self, name: &str, node: NodeHandle) -> Result<(), GraphError> {
        if name == END {
            return Err(GraphError::ReservedName(name.to_string()));
        }
        if self.nodes.contains_key(name) {
            return Err(GraphError::DuplicateNode(name.to_string()));
        }
        self.nodes.insert(name.to_string(), node);
        Ok(())
    }

    fn add_edge(&mut self, source: &str, target: &str) -> Result<(), GraphError> {
        if self.has_outgoing(source) {
            return Err(GraphError::ConflictingEdges(source.to_string()));
        }
        self.edges.insert(source.to_string(), target.to_string());
        Ok(())
    }

    fn add_conditional_edges(
        &mut self,
        source: &str,
        route: RouteHandle,
        mapping: BTreeMap<String, String>,
    ) -> Result<(), GraphError> {
        if self.has_outgoing(source) {
            return Err(GraphError::ConflictingEdges(source.to_string()));
        }
        self.conditionals
            .insert(source.to_string(), (route, mapping));
        Ok(())
    }

    fn set_entry_point(&mut self, name: &str) -> Result<(), GraphError> {
        self.entry = Some(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn passthrough(state: Value) -> Result<Value, GraphError> {
        Ok(state)
    }

    #[test]
    fn test_identity_defaults_to_type_name() {
        let node = NodeHandle::new(passthrough);
        assert!(node.identity().ends_with("passthrough"));

        let named = NodeHandle::named("custom::id", passthrough);
        assert_eq!(named.identity(), "custom::id");
    }

    #[test]
    fn test_duplicate_and_reserved_nodes() {
        let mut graph = StateGraph::new();
        graph.add_node("a", NodeHandle::new(passthrough)).unwrap();
        assert!(matches!(
            graph.add_node("a", NodeHandle::new(passthrough)),
            Err(GraphError::DuplicateNode(_))
        ));
        assert!(matches!(
            graph.add_node(END, NodeHandle::new(passthrough)),
            Err(GraphError::ReservedName(_))
        ));
    }

    #[test]
    fn test_conflicting_edges() {
        let mut graph = StateGraph::new();
        graph.add_edge("a", "b").unwrap();
        assert!(matches!(
            graph.add_edge("a", "c"),
            Err(GraphError::ConflictingEdges(_))
        ));
        assert!(graph
            .add_conditional_edges("a", RouteHandle::new(|_: &Value| "x".to_string()), BTreeMap::new())
            .is_err());
    }

    #[test]
    fn test_compile_validation() {
        let graph = StateGraph::new();
        assert!(matches!(graph.compile(), Err(GraphError::MissingEntryPoint)));

        let mut graph = StateGraph::new();
        graph.add_node("a", NodeHandle::new(passthrough)).unwrap();
        graph.set_entry_point("a").unwrap();
        graph.add_edge("a", "missing").unwrap();
        assert!(matches!(graph.compile(), Err(GraphError::UnknownNode(n)) if n == "missing"));

        let mut graph = StateGraph::new();
        graph.add_node("a", NodeHandle::new(passthrough)).unwrap();
        graph.set_entry_point("a").unwrap();
        graph.add_edge("a", END).unwrap();
        assert!(graph.compile().is_ok());
    }
}
