//! Graph execution

use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use super::builder::{NodeHandle, RouteHandle};
use super::checkpoint::{Checkpoint, InMemoryCheckpointer};
use super::{END, GraphError};
use crate::context::ContextScope;

/// Maximum number of node executions per invocation
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

/// A validated, executable graph
#[derive(Debug)]
pub struct CompiledGraph {
    entry: String,
    nodes: HashMap<String, NodeHandle>,
    edges: HashMap<String, String>,
    conditionals: HashMap<String, (RouteHandle, BTreeMap<String, String>)>,
    recursion_limit: usize,
    checkpointer: Option<Arc<InMemoryCheckpointer>>,
}

impl CompiledGraph {
    pub(super) fn new(
        entry: String,
        nodes: HashMap<String, NodeHandle>,
        edges: HashMap<String, String>,
        conditionals: HashMap<String, (RouteHandle, BTreeMap<String, String>)>,
    ) -> Self {
        Self {
            entry,
            nodes,
            edges,
            conditionals,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            checkpointer: None,
        }
    }

    /// Persist a checkpoint after every step
    pub fn with_checkpointer(mut self, checkpointer: Arc<InMemoryCheckpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn checkpointer(&self) -> Option<&Arc<InMemoryCheckpointer>> {
        self.checkpointer.as_ref()
    }

    /// Run from the entry point until a node routes to `END`
    pub async fn invoke(&self, thread_id: &str, state: Value) -> Result<Value, GraphError> {
        info!(thread_id, entry = %self.entry, "invoking graph");
        self.run_from(self.entry.clone(), state, thread_id, 0).await
    }

    /// Continue a thread from a stored checkpoint
    pub async fn resume(&self, checkpoint_id: &str) -> Result<Value, GraphError> {
        let checkpointer = self.checkpointer.as_ref().ok_or(GraphError::NoCheckpointer)?;
        let checkpoint = checkpointer
            .get(checkpoint_id)
            .ok_or_else(|| GraphError::CheckpointNotFound(checkpoint_id.to_string()))?;

        info!(
            thread_id = %checkpoint.thread_id,
            checkpoint_id,
            next = %checkpoint.next,
            "resuming graph"
        );
        if checkpoint.next == END {
            return Ok(checkpoint.state);
        }
        self.run_from(
            checkpoint.next,
            checkpoint.state,
            &checkpoint.thread_id,
            checkpoint.step + 1,
        )
        .await
    }

    async fn run_from(
        &self,
        mut current: String,
        mut state: Value,
        thread_id: &str,
        mut step: usize,
    ) -> Result<Value, GraphError> {
        let mut executed = 0;
        loop {
            if executed >= self.recursion_limit {
                return Err(GraphError::RecursionLimit(self.recursion_limit));
            }
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| GraphError::UnknownNode(current.clone()))?;

            let checkpoint_id = uuid::Uuid::new_v4().to_string();
            debug!(node = %current, step, checkpoint_id = %checkpoint_id, "executing node");
            state = ContextScope::new()
                .checkpoint_id(checkpoint_id.clone())
                .run(node.call(state))
                .await?;
            executed += 1;

            let next = self.next_node(&current, &state)?;
            if let Some(checkpointer) = &self.checkpointer {
                checkpointer.put(Checkpoint {
                    id: checkpoint_id,
                    thread_id: thread_id.to_string(),
                    step,
                    node: current.clone(),
                    next: next.clone(),
                    state: state.clone(),
                    created_at: Utc::now(),
                });
            }

            if next == END {
                debug!(steps = executed, "graph reached end");
                return Ok(state);
            }
            current = next;
            step += 1;
        }
    }

    fn next_node(&self, current: &str, state: &Value) -> Result<String, GraphError> {
        if let Some(target) = self.edges.get(current) {
            return Ok(target.clone());
        }
        if let Some((route, mapping)) = self.conditionals.get(current) {
            let label = route.choose(state);
            return mapping
                .get(&label)
                .cloned()
                .ok_or_else(|| GraphError::UnmappedRoute {
                    node: current.to_string(),
                    label,
                });
        }
        Ok(END.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::graph::{GraphBuilder, StateGraph};
    use serde_json::json;

    async fn increment(state: Value) -> Result<Value, GraphError> {
        let n = state["n"].as_i64().unwrap_or(0);
        Ok(json!({ "n": n + 1 }))
    }

    async fn record_checkpoint(mut state: Value) -> Result<Value, GraphError> {
        let cp = ExecutionContext::current().checkpoint_id;
        if let Some(list) = state["checkpoints"].as_array_mut() {
            list.push(json!(cp));
        }
        Ok(state)
    }

    fn looping_graph() -> StateGraph {
        let mut graph = StateGraph::new();
        graph.add_node("inc", NodeHandle::new(increment)).unwrap();
        graph.set_entry_point("inc").unwrap();
        let mapping = BTreeMap::from([
            ("again".to_string(), "inc".to_string()),
            ("done".to_string(), END.to_string()),
        ]);
        graph
            .add_conditional_edges(
                "inc",
                RouteHandle::new(|state: &Value| {
                    if state["n"].as_i64().unwrap_or(0) < 3 {
                        "again".to_string()
                    } else {
                        "done".to_string()
                    }
                }),
                mapping,
            )
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn test_conditional_loop() {
        let compiled = looping_graph().compile().unwrap();
        let out = compiled.invoke("t1", json!({"n": 0})).await.unwrap();
        assert_eq!(out, json!({"n": 3}));
    }

    #[tokio::test]
    async fn test_recursion_limit() {
        let compiled = looping_graph().compile().unwrap().with_recursion_limit(2);
        let err = compiled.invoke("t1", json!({"n": 0})).await.unwrap_err();
        assert!(matches!(err, GraphError::RecursionLimit(2)));
    }

    #[tokio::test]
    async fn test_each_step_gets_a_checkpoint_id() {
        let mut graph = StateGraph::new();
        graph.add_node("a", NodeHandle::new(record_checkpoint)).unwrap();
        graph.add_node("b", NodeHandle::new(record_checkpoint)).unwrap();
        graph.set_entry_point("a").unwrap();
        graph.add_edge("a", "b").unwrap();
        graph.add_edge("b", END).unwrap();

        let checkpointer = Arc::new(InMemoryCheckpointer::new());
        let compiled = graph.compile().unwrap().with_checkpointer(checkpointer.clone());
        let out = compiled
            .invoke("thread", json!({"checkpoints": []}))
            .await
            .unwrap();

        let seen = out["checkpoints"].as_array().unwrap();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);

        let history = checkpointer.history("thread");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].node, "b");
        assert_eq!(history[0].next, END);
        assert_eq!(json!(history[1].id), seen[0]);
        assert!(ExecutionContext::current().checkpoint_id.is_none());
    }

    #[tokio::test]
    async fn test_resume_from_checkpoint() {
        let mut graph = StateGraph::new();
        graph.add_node("first", NodeHandle::new(increment)).unwrap();
        graph.add_node("second", NodeHandle::new(increment)).unwrap();
        graph.set_entry_point("first").unwrap();
        graph.add_edge("first", "second").unwrap();

        let checkpointer = Arc::new(InMemoryCheckpointer::new());
        let compiled = graph.compile().unwrap().with_checkpointer(checkpointer.clone());
        compiled.invoke("t", json!({"n": 0})).await.unwrap();

        let history = checkpointer.history("t");
        let after_first = history.iter().find(|cp| cp.node == "first").unwrap();
        let resumed = compiled.resume(&after_first.id).await.unwrap();
        assert_eq!(resumed, json!({"n": 2}));

        let last = checkpointer.latest("t").unwrap();
        assert_eq!(last.step, 1);
    }

    #[tokio::test]
    async fn test_unmapped_route_and_missing_checkpointer() {
        let mut graph = StateGraph::new();
        graph.add_node("a", NodeHandle::new(increment)).unwrap();
        graph.set_entry_point("a").unwrap();
        graph
            .add_conditional_edges(
                "a",
                RouteHandle::new(|_: &Value| "nowhere".to_string()),
                BTreeMap::new(),
            )
            .unwrap();
        let compiled = graph.compile().unwrap();

        let err = compiled.invoke("t", json!({})).await.unwrap_err();
        assert!(matches!(err, GraphError::UnmappedRoute { label, .. } if label == "nowhere"));
        assert!(matches!(
            compiled.resume("cp").await,
            Err(GraphError::NoCheckpointer)
        ));
    }
}
