//! Run comparison
//!
//! Spans of two runs are keyed by `(kind, name, node_id, fingerprint)`. Keys found
//! in both runs become matched pairs with structural patches over their payloads
//! (`before_state`/`after_state` for node spans, `request`/`response` otherwise).
//! The rest are reported as left-only or right-only. A payload pair that cannot be
//! compared yields an empty patch instead of failing the comparison.

mod engine;
mod patch;


pub use engine::{
    CompactSpan, DiffEngine, DiffKey, DiffSummary, MatchedPair, SpanDiff, SpanPatches,
};
pub use patch::{PatchError, PatchOp, diff_values, pointer};
