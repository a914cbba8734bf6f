//! Graph topology recording and signatures
//!
//! [`RecordingBuilder`] wraps any [`GraphBuilder`]: each declaration is forwarded
//! to the wrapped builder and, once accepted, appended to a structure-only log.
//! Function identities are kept as strings. [`RecordedGraph::signature`] hashes a
//! canonically sorted form of the log, so the same structure declared in any
//! order has the same signature.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::fingerprint::{canonical_json, canonicalize, hash_str};
use crate::graph::{GraphBuilder, GraphError, NodeHandle, RouteHandle};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedNode {
    pub name: String,
    pub function: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEdge {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedConditional {
    pub source: String,
    /// Identity of the routing function
    pub chooser: String,
    /// Outcome label to target node
    pub mapping: BTreeMap<String, String>,
}

/// Structure of a graph as declared
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordedGraph {
    pub entrypoint: Option<String>,
    pub nodes: Vec<RecordedNode>,
    pub edges: Vec<RecordedEdge>,
    pub conditionals: Vec<RecordedConditional>,
}

/// Sorted view used for hashing
#[derive(Serialize)]
struct SignaturePayload<'a> {
    entry: Option<&'a str>,
    nodes: Vec<&'a RecordedNode>,
    edges: Vec<&'a RecordedEdge>,
    conds: Vec<&'a RecordedConditional>,
}

impl RecordedGraph {
    /// Hex SHA-256 over the canonical, sorted structure
    pub fn signature(&self) -> String {
        let mut nodes: Vec<&RecordedNode> = self.nodes.iter().collect();
        nodes.sort_by(|a, b| (&a.name, &a.function).cmp(&(&b.name, &b.function)));

        let mut edges: Vec<&RecordedEdge> = self.edges.iter().collect();
        edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

        let mut conds: Vec<&RecordedConditional> = self.conditionals.iter().collect();
        conds.sort_by(|a, b| {
            (&a.source, &a.chooser, &a.mapping).cmp(&(&b.source, &b.chooser, &b.mapping))
        });

        let payload = SignaturePayload {
            entry: self.entrypoint.as_deref(),
            nodes,
            edges,
            conds,
        };
        hash_str(&canonical_json(&canonicalize(&payload)))
    }

    pub fn node(&self, name: &str) -> Option<&RecordedNode> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// A [`GraphBuilder`] that logs every accepted declaration of the builder it wraps
#[derive(Debug)]
pub struct RecordingBuilder<B> {
    inner: B,
    log: RecordedGraph,
}

impl<B: GraphBuilder> RecordingBuilder<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            log: RecordedGraph::default(),
        }
    }

    /// The topology recorded so far
    pub fn recorded(&self) -> &RecordedGraph {
        &self.log
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// End recording, returning the wrapped builder and the frozen topology
    pub fn into_parts(self) -> (B, RecordedGraph) {
        tracing::debug!(
            nodes = self.log.nodes.len(),
            edges = self.log.edges.len(),
            conditionals = self.log.conditionals.len(),
            "topology recorded"
        );
        (self.inner, self.log)
    }
}

impl<B: GraphBuilder> GraphBuilder for RecordingBuilder<B> {
    fn add_node(&mut self, name: &str, node: NodeHandle) -> Result<(), GraphError> {
        let function = node.identity().to_string();
        self.inner.add_node(name, node)?;
        self.log.nodes.push(RecordedNode {
            name: name.to_string(),
            function,
        });
        Ok(())
    }

    fn add_edge(&mut self, source: &str, target: &str) -> Result<(), GraphError> {
        self.inner.add_edge(source, target)?;
        self.log.edges.push(RecordedEdge {
            source: source.to_string(),
            target: target.to_string(),
        });
        Ok(())
    }

    fn add_conditional_edges(
        &mut self,
        source: &str,
        route: RouteHandle,
        mapping: BTreeMap<String, String>,
    ) -> Result<(), GraphError> {
        let chooser = route.identity().to_string();
        self.inner
            .add_conditional_edges(source, route, mapping.clone())?;
        self.log.conditionals.push(RecordedConditional {
            source: source.to_string(),
            chooser,
            mapping,
        });
        Ok(())
    }

    fn set_entry_point(&mut self, name: &str) -> Result<(), GraphError> {
        self.inner.set_entry_point(name)?;
        self.log.entrypoint = Some(name.to_string());
        Ok(())
    }
}

/// Record the topology declared by `build` on `builder`.
///
/// ```rust,ignore
/// let (graph, recorded) = record_graph_build(StateGraph::new(), |g| {
///     g.add_node("a", NodeHandle::new(step))?;
///     g.set_entry_point("a")
/// })?;
/// let signature = recorded.signature();
/// ```
pub fn record_graph_build<B, F>(builder: B, build: F) -> Result<(B, RecordedGraph), GraphError>
where
    B: GraphBuilder,
    F: FnOnce(&mut RecordingBuilder<B>) -> Result<(), GraphError>,
{
    let mut recorder = RecordingBuilder::new(builder);
    build(&mut recorder)?;
    Ok(recorder.into_parts())
}
