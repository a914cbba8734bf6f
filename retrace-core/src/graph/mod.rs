//! Minimal state-graph engine
//!
//! A small stand-in for a graph-construction/execution engine: nodes map a JSON
//! state to a new state, edges are either unconditional or chosen by a routing
//! function, and every executed step is stamped with a fresh checkpoint id in the
//! execution context. The topology recorder and node instrumentation are written
//! against the [`GraphBuilder`] trait, so any engine exposing the same four
//! declarations can be recorded.

mod builder;
mod checkpoint;
mod compiled;

pub use builder::{GraphBuilder, NodeFn, NodeHandle, RouteFn, RouteHandle, StateGraph};
pub use checkpoint::{Checkpoint, InMemoryCheckpointer};
pub use compiled::{CompiledGraph, DEFAULT_RECURSION_LIMIT};

use thiserror::Error;

/// Reserved target name that terminates execution
pub const END: &str = "__end__";

/// Error type for graph construction and execution
#[derive(Debug, Error)]
pub enum GraphError {
    /// A node name was declared twice
    #[error("Node '{0}' is already declared")]
    DuplicateNode(String),

    /// An edge, route or entry point names a node that does not exist
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// A node name is reserved
    #[error("Node name '{0}' is reserved")]
    ReservedName(String),

    /// The graph was compiled without an entry point
    #[error("Graph has no entry point")]
    MissingEntryPoint,

    /// A node already has an outgoing edge
    #[error("Node '{0}' already has an outgoing edge")]
    ConflictingEdges(String),

    /// A routing function returned a label with no mapped target
    #[error("Route from '{node}' returned unmapped label '{label}'")]
    UnmappedRoute { node: String, label: String },

    /// Execution exceeded the step limit
    #[error("Recursion limit of {0} steps reached")]
    RecursionLimit(usize),

    /// A node function failed
    #[error("Node '{node}' failed: {message}")]
    NodeFailed { node: String, message: String },

    /// Resume requested from an unknown checkpoint
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// Resume requested on a graph compiled without a checkpointer
    #[error("Graph was compiled without a checkpointer")]
    NoCheckpointer,
}

impl GraphError {
    /// Failure raised from inside a node function
    pub fn node_failed(node: impl Into<String>, message: impl std::fmt::Display) -> Self {
        GraphError::NodeFailed {
            node: node.into(),
            message: message.to_string(),
        }
    }
}
