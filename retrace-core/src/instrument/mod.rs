//! Instrumentation wrappers for tool calls and node transitions
//!
//! Every wrapped invocation produces exactly one [`Span`]:
//!
//! - [`ToolInstrument`] fingerprints the call arguments, substitutes a registered
//!   stub when one matches and otherwise runs the live call. Failures are spanned
//!   and handed back unchanged.
//! - [`NodeInstrument`] snapshots the state before and after a node function and
//!   runs it inside a context scope whose `node_id` is the node's name, so tool
//!   spans raised inside the node carry that id.
//!
//! ```rust,ignore
//! use retrace_core::instrument::Instrumentor;
//! use retrace_core::fingerprint::CallArgs;
//!
//! let inst = Instrumentor::global();
//! let value: f64 = inst
//!     .tool("random")
//!     .call(CallArgs::new(), || async { Ok::<_, std::io::Error>(rand::random()) })
//!     .await?;
//! ```

mod node;
mod tool;


pub use node::NodeInstrument;
pub use tool::{InstrumentedTool, ToolFn, ToolInstrument};

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

use crate::config::RecordingConfig;
use crate::graph::{GraphError, NodeHandle};
use crate::span::{Span, SpanRecorder};
use crate::stub::StubRegistry;

/// Shared handles the wrappers consult and record into
#[derive(Debug, Clone)]
pub struct Instrumentor {
    stubs: Arc<StubRegistry>,
    recorder: Arc<SpanRecorder>,
    settings: RecordingConfig,
}

impl Instrumentor {
    /// Build over explicit registry and recorder instances
    pub fn new(stubs: Arc<StubRegistry>, recorder: Arc<SpanRecorder>) -> Self {
        Self {
            stubs,
            recorder,
            settings: RecordingConfig::default(),
        }
    }

    /// Build over the process-wide registry and recorder
    pub fn global() -> Self {
        Self::new(StubRegistry::global(), SpanRecorder::global())
    }

    pub fn with_config(mut self, settings: RecordingConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn stubs(&self) -> &Arc<StubRegistry> {
        &self.stubs
    }

    pub fn recorder(&self) -> &Arc<SpanRecorder> {
        &self.recorder
    }

    pub fn settings(&self) -> &RecordingConfig {
        &self.settings
    }

    /// Wrapper for a tool named `name`
    pub fn tool(&self, name: impl Into<String>) -> ToolInstrument {
        ToolInstrument::new(self.clone(), name)
    }

    /// Wrapper for the graph node named `name`
    pub fn node(&self, name: impl Into<String>) -> NodeInstrument {
        NodeInstrument::new(self.clone(), name)
    }

    /// Bind a tool function once, keeping its type name as the function identity
    pub fn wrap_tool<I, O, E, F, Fut>(&self, name: impl Into<String>, func: F) -> InstrumentedTool<I, O, E>
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<O, E>> + Send + 'static,
    {
        let function = std::any::type_name::<F>();
        InstrumentedTool::new(
            self.tool(name).function(function),
            Arc::new(move |input| -> BoxFuture<'static, Result<O, E>> {
                Box::pin(func(input))
            }),
        )
    }

    /// Wrap a graph node so each execution emits a `node` span.
    ///
    /// The returned handle keeps the original identity, so a topology recorded
    /// with instrumented nodes has the same signature as one without.
    pub fn instrument_node(&self, name: &str, node: NodeHandle) -> NodeHandle {
        let identity = node.identity().to_string();
        let wrapper = self.node(name).function(identity.clone());
        let inner = node.func();
        NodeHandle::from_fn(
            identity,
            Arc::new(move |state: Value| -> BoxFuture<'static, Result<Value, GraphError>> {
                let wrapper = wrapper.clone();
                let inner = inner.clone();
                Box::pin(async move { wrapper.call(state, |s| inner(s)).await })
            }),
        )
    }

    pub(crate) fn threshold(&self) -> Option<usize> {
        self.settings.artifact_threshold_bytes
    }

    pub(crate) fn emit(&self, span: Span) {
        if self.settings.enabled {
            self.recorder.record(span);
        } else {
            tracing::trace!(name = %span.name, "recording disabled, span dropped");
        }
    }
}

impl Default for Instrumentor {
    fn default() -> Self {
        Self::global()
    }
}
