//! Span model
//!
//! A span is one finalized observation of an instrumented call: its identity
//! (run, node, checkpoint), timing, content fingerprint and kind-dependent
//! attributes. Spans are created at call entry as a [`PendingSpan`], finalized
//! exactly once at exit and appended to a [`SpanRecorder`] until the run's
//! spans are handed to storage.

mod record;
mod recorder;

pub use record::{
    Artifact, KIND_NODE, KIND_TOOL, NodeAttrs, PendingSpan, Span, SpanAttrs, SpanStatus,
    ToolAttrs, ToolMode,
};
pub use recorder::SpanRecorder;
