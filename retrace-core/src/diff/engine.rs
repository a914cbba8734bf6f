//! Cross-run span matching

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::patch::{PatchOp, diff_values};
use crate::config::DiffConfig;
use crate::span::{KIND_NODE, Span};

/// Identifies the same logical step in two runs
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiffKey {
    pub kind: String,
    pub name: String,
    pub node_id: Option<String>,
    pub fingerprint: String,
}

impl DiffKey {
    pub fn of(span: &Span) -> Self {
        Self {
            kind: span.kind.clone(),
            name: span.name.clone(),
            node_id: span.node_id.clone(),
            fingerprint: span.fingerprint.clone(),
        }
    }
}

/// Per-field patches of a matched pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpanPatches {
    Node {
        before_state_patch: Vec<PatchOp>,
        after_state_patch: Vec<PatchOp>,
    },
    Call {
        request_patch: Vec<PatchOp>,
        response_patch: Vec<PatchOp>,
    },
}

impl SpanPatches {
    pub fn is_empty(&self) -> bool {
        match self {
            SpanPatches::Node {
                before_state_patch,
                after_state_patch,
            } => before_state_patch.is_empty() && after_state_patch.is_empty(),
            SpanPatches::Call {
                request_patch,
                response_patch,
            } => request_patch.is_empty() && response_patch.is_empty(),
        }
    }
}

/// Both spans of a matched key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub kind: String,
    pub name: String,
    pub node_id: Option<String>,
    pub fingerprint: String,
    pub left: Span,
    pub right: Span,
    pub diffs: SpanPatches,
}

/// Identity-only record of an unmatched span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactSpan {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub node_id: Option<String>,
    pub fingerprint: String,
}

impl From<&Span> for CompactSpan {
    fn from(span: &Span) -> Self {
        Self {
            id: span.id.clone(),
            kind: span.kind.clone(),
            name: span.name.clone(),
            node_id: span.node_id.clone(),
            fingerprint: span.fingerprint.clone(),
        }
    }
}

impl CompactSpan {
    pub fn key(&self) -> DiffKey {
        DiffKey {
            kind: self.kind.clone(),
            name: self.name.clone(),
            node_id: self.node_id.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffSummary {
    pub matched: usize,
    pub only_left: usize,
    pub only_right: usize,
}

/// Result of comparing two span collections; every list is ordered by key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanDiff {
    pub summary: DiffSummary,
    pub matched: Vec<MatchedPair>,
    pub only_left: Vec<CompactSpan>,
    pub only_right: Vec<CompactSpan>,
}

impl SpanDiff {
    /// No unmatched spans and no field changes
    pub fn is_identical(&self) -> bool {
        self.only_left.is_empty()
            && self.only_right.is_empty()
            && self.matched.iter().all(|pair| pair.diffs.is_empty())
    }
}

/// Matches spans by [`DiffKey`] and patches the payloads of matched pairs
#[derive(Debug, Clone)]
pub struct DiffEngine {
    max_depth: usize,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::from_config(&DiffConfig::default())
    }
}

impl DiffEngine {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn from_config(config: &DiffConfig) -> Self {
        Self::new(config.max_patch_depth)
    }

    /// Compare two runs' spans, each in append order
    pub fn diff_spans(&self, left: &[Span], right: &[Span]) -> SpanDiff {
        let left_by_key = index(left);
        let right_by_key = index(right);

        let mut matched = Vec::new();
        let mut only_left = Vec::new();
        for (key, l) in &left_by_key {
            match right_by_key.get(key) {
                Some(r) => matched.push(self.pair(key, l, r)),
                None => only_left.push(CompactSpan::from(*l)),
            }
        }
        let only_right: Vec<CompactSpan> = right_by_key
            .iter()
            .filter(|(key, _)| !left_by_key.contains_key(*key))
            .map(|(_, r)| CompactSpan::from(*r))
            .collect();

        let summary = DiffSummary {
            matched: matched.len(),
            only_left: only_left.len(),
            only_right: only_right.len(),
        };
        debug!(
            matched = summary.matched,
            only_left = summary.only_left,
            only_right = summary.only_right,
            "spans compared"
        );

        SpanDiff {
            summary,
            matched,
            only_left,
            only_right,
        }
    }

    fn pair(&self, key: &DiffKey, left: &Span, right: &Span) -> MatchedPair {
        let diffs = if key.kind == KIND_NODE {
            SpanPatches::Node {
                before_state_patch: self.field_patch(left, right, "before_state"),
                after_state_patch: self.field_patch(left, right, "after_state"),
            }
        } else {
            SpanPatches::Call {
                request_patch: self.field_patch(left, right, "request"),
                response_patch: self.field_patch(left, right, "response"),
            }
        };

        MatchedPair {
            kind: key.kind.clone(),
            name: key.name.clone(),
            node_id: key.node_id.clone(),
            fingerprint: key.fingerprint.clone(),
            left: left.clone(),
            right: right.clone(),
            diffs,
        }
    }

    /// Patch of one attribute; an absent attribute compares as `null`
    fn field_patch(&self, left: &Span, right: &Span, field: &str) -> Vec<PatchOp> {
        let l = left.attrs.field(field).unwrap_or(Value::Null);
        let r = right.attrs.field(field).unwrap_or(Value::Null);
        match diff_values(&l, &r, self.max_depth) {
            Ok(ops) => ops,
            Err(e) => {
                warn!(field, error = %e, "payloads not comparable, reporting empty patch");
                Vec::new()
            }
        }
    }
}

/// Key each span; a key repeated within one run keeps the last span
fn index(spans: &[Span]) -> BTreeMap<DiffKey, &Span> {
    let mut by_key = BTreeMap::new();
    for span in spans {
        if let Some(previous) = by_key.insert(DiffKey::of(span), span) {
            debug!(
                replaced = %previous.id,
                by = %span.id,
                name = %span.name,
                "duplicate diff key, keeping the later span"
            );
        }
    }
    by_key
}
