//! # Retrace - Record, Stub and Compare Agent Graph Executions
//!
//! Retrace instruments a node/edge execution graph so that every tool call and
//! every node transition leaves a timestamped, content-fingerprinted span:
//! - Path-local execution context (run, node and checkpoint ids, replay policy)
//! - Deterministic fingerprints over call kind, name and arguments
//! - A stub registry that substitutes canned responses for matching calls
//! - Graph topology recording with an order-independent signature
//! - A diff engine that matches spans across two runs and patches their payloads
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use retrace_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let inst = Instrumentor::global();
//!     let random = inst.tool("random");
//!
//!     // Replay a known value instead of calling live
//!     inst.stubs().add(random.fingerprint(&CallArgs::new()), serde_json::json!(0.9));
//!
//!     let value: f64 = random
//!         .call(CallArgs::new(), || async { Ok::<_, std::io::Error>(0.1) })
//!         .await?;
//!     assert_eq!(value, 0.9);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **context / fingerprint / span / stub**: the data model and shared state
//! - **instrument**: tool-call and node-transition wrappers built on them
//! - **graph / topology**: a small state-graph engine and its structure recorder
//! - **diff / store / runner**: persisted runs and their comparison

pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod instrument;
pub mod runner;
pub mod span;
pub mod store;
pub mod stub;
pub mod topology;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{
        ConfigBuilder, DiffConfig, RecordingConfig, ReplayConfig, RetraceConfig, StorageConfig,
    };
    pub use crate::context::{ContextScope, ExecutionContext, ReplayPolicy};
    pub use crate::diff::{
        CompactSpan, DiffEngine, DiffKey, DiffSummary, MatchedPair, PatchOp, SpanDiff,
        SpanPatches,
    };
    pub use crate::error::{Result, TraceError};
    pub use crate::fingerprint::{CallArgs, CanonicalForm, fingerprint, node_fingerprint};
    pub use crate::graph::{
        CompiledGraph, END, GraphBuilder, GraphError, InMemoryCheckpointer, NodeHandle,
        RouteHandle, StateGraph,
    };
    pub use crate::instrument::{InstrumentedTool, Instrumentor, NodeInstrument, ToolInstrument};
    pub use crate::runner::{
        DiffReport, RunExecutor, RunOutcome, RunRequest, diff_runs, seed_from_run,
    };
    pub use crate::span::{Artifact, Span, SpanAttrs, SpanRecorder, SpanStatus, ToolMode};
    pub use crate::store::{InMemoryRunStore, JsonlRunStore, Run, RunRepository, RunStatus};
    pub use crate::stub::StubRegistry;
    pub use crate::topology::{RecordedGraph, RecordingBuilder, record_graph_build};
}
