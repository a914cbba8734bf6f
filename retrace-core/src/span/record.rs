//! Span record types
//!
//! Defines the finalized span, its kind-dependent attributes and artifact
//! references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::ExecutionContext;
use crate::fingerprint::{CallArgs, canonical_json, hash_bytes};

/// Span kind for tool calls
pub const KIND_TOOL: &str = "tool";

/// Span kind for graph node transitions
pub const KIND_NODE: &str = "node";

/// Outcome of an instrumented call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Error,
}

/// Whether a tool result came from the live call or from a stub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    Live,
    Stubbed,
}

/// Attributes of a `tool` span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolAttrs {
    /// Stable identity of the implementing function
    pub function: String,
    pub mode: ToolMode,
    pub status: SpanStatus,
    pub request: CallArgs,
    /// Present (possibly `null`) on success, absent on error
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Fields this version does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Keeps an explicit `null` as `Some(Value::Null)`; only a missing field is `None`
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Attributes of a `node` span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAttrs {
    pub function: String,
    pub status: SpanStatus,
    /// Snapshot of the input state, `null` when it was not a mapping
    #[serde(default)]
    pub before_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Kind-dependent span attributes.
///
/// Serialized untagged: the span's `kind` field selects the shape when decoding
/// (see [`SpanAttrs::from_kind`]).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SpanAttrs {
    Tool(ToolAttrs),
    Node(NodeAttrs),
    /// Any other kind, or a known kind whose payload does not fit its shape
    Other(Map<String, Value>),
}

impl SpanAttrs {
    /// Decode attributes for a span of the given kind
    pub fn from_kind(kind: &str, value: Value) -> Self {
        let decoded = match kind {
            KIND_TOOL => serde_json::from_value::<ToolAttrs>(value.clone())
                .map(SpanAttrs::Tool)
                .ok(),
            KIND_NODE => serde_json::from_value::<NodeAttrs>(value.clone())
                .map(SpanAttrs::Node)
                .ok(),
            _ => None,
        };

        decoded.unwrap_or_else(|| match value {
            Value::Object(map) => SpanAttrs::Other(map),
            Value::Null => SpanAttrs::Other(Map::new()),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                SpanAttrs::Other(map)
            }
        })
    }

    /// Status, if the shape records one
    pub fn status(&self) -> Option<SpanStatus> {
        match self {
            SpanAttrs::Tool(attrs) => Some(attrs.status),
            SpanAttrs::Node(attrs) => Some(attrs.status),
            SpanAttrs::Other(map) => map
                .get("status")
                .and_then(|s| serde_json::from_value(s.clone()).ok()),
        }
    }

    /// Look up a top-level attribute as JSON, whatever the shape
    pub fn field(&self, name: &str) -> Option<Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove(name).filter(|v| !v.is_null()),
            _ => None,
        }
    }

    pub fn as_tool(&self) -> Option<&ToolAttrs> {
        match self {
            SpanAttrs::Tool(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&NodeAttrs> {
        match self {
            SpanAttrs::Node(attrs) => Some(attrs),
            _ => None,
        }
    }
}

/// Reference to a payload kept outside the span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub uri: String,
    pub mime: String,
    pub sha256: String,
    pub size: u64,
    #[serde(default)]
    pub redacted: bool,
    #[serde(default)]
    pub is_synthetic: bool,
}

impl Artifact {
    /// Content-addressed descriptor for raw bytes
    pub fn from_bytes(bytes: &[u8], mime: impl Into<String>) -> Self {
        let sha256 = hash_bytes(bytes);
        Self {
            uri: format!("sha256:{}", sha256),
            mime: mime.into(),
            sha256,
            size: bytes.len() as u64,
            redacted: false,
            is_synthetic: false,
        }
    }

    /// Descriptor for a JSON payload, hashed over its canonical text
    pub fn from_json(value: &Value) -> Self {
        Self::from_bytes(canonical_json(value).as_bytes(), "application/json")
    }

    /// Descriptor for `value` if its canonical text exceeds `threshold` bytes
    pub fn above_threshold(value: &Value, threshold: Option<usize>) -> Option<Self> {
        let threshold = threshold?;
        let text = canonical_json(value);
        (text.len() > threshold).then(|| Self::from_bytes(text.as_bytes(), "application/json"))
    }
}

/// One finalized observation of an instrumented call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSpan")]
pub struct Span {
    pub id: String,
    pub run_id: Option<String>,
    pub checkpoint_id: Option<String>,
    pub node_id: Option<String>,
    /// Open tag: "tool", "node", "http", ...
    pub kind: String,
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attrs: SpanAttrs,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_artifact: Option<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_artifact: Option<Artifact>,
}

impl Span {
    /// Duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        (self.end - self.start).num_milliseconds().max(0) as u64
    }

    pub fn status(&self) -> Option<SpanStatus> {
        self.attrs.status()
    }

    pub fn is_ok(&self) -> bool {
        self.status() == Some(SpanStatus::Ok)
    }
}

/// Wire shape used to pick the attribute variant from `kind`
#[derive(Deserialize)]
struct RawSpan {
    id: String,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    checkpoint_id: Option<String>,
    #[serde(default)]
    node_id: Option<String>,
    kind: String,
    name: String,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    attrs: Value,
    fingerprint: String,
    #[serde(default)]
    request_artifact: Option<Artifact>,
    #[serde(default)]
    response_artifact: Option<Artifact>,
}

impl TryFrom<RawSpan> for Span {
    type Error = String;

    fn try_from(raw: RawSpan) -> Result<Self, Self::Error> {
        let end = raw
            .end
            .ok_or_else(|| format!("span {} has no end time", raw.id))?;
        let attrs = SpanAttrs::from_kind(&raw.kind, raw.attrs);
        Ok(Span {
            id: raw.id,
            run_id: raw.run_id,
            checkpoint_id: raw.checkpoint_id,
            node_id: raw.node_id,
            kind: raw.kind,
            name: raw.name,
            start: raw.start,
            end,
            attrs,
            fingerprint: raw.fingerprint,
            request_artifact: raw.request_artifact,
            response_artifact: raw.response_artifact,
        })
    }
}

/// A span between call entry and exit.
///
/// Finalizing consumes it, so a call produces at most one [`Span`].
#[derive(Debug)]
pub struct PendingSpan {
    kind: String,
    name: String,
    fingerprint: String,
    start: DateTime<Utc>,
    request_artifact: Option<Artifact>,
    response_artifact: Option<Artifact>,
}

impl PendingSpan {
    /// Open a span, stamping the start time
    pub fn start(
        kind: impl Into<String>,
        name: impl Into<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            fingerprint: fingerprint.into(),
            start: Utc::now(),
            request_artifact: None,
            response_artifact: None,
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn set_request_artifact(&mut self, artifact: Option<Artifact>) {
        self.request_artifact = artifact;
    }

    pub fn set_response_artifact(&mut self, artifact: Option<Artifact>) {
        self.response_artifact = artifact;
    }

    /// Close the span with the ids of `ctx`.
    ///
    /// `node_override` replaces the context's node id. The end time never
    /// precedes the start time, even if the wall clock steps backwards.
    pub fn finish(
        self,
        attrs: SpanAttrs,
        ctx: &ExecutionContext,
        node_override: Option<&str>,
    ) -> Span {
        let end = Utc::now().max(self.start);
        Span {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: ctx.run_id.clone(),
            checkpoint_id: ctx.checkpoint_id.clone(),
            node_id: node_override
                .map(str::to_string)
                .or_else(|| ctx.node_id.clone()),
            kind: self.kind,
            name: self.name,
            start: self.start,
            end,
            attrs,
            fingerprint: self.fingerprint,
            request_artifact: self.request_artifact,
            response_artifact: self.response_artifact,
        }
    }
}

#[cfg(test)]
mod record_tests {
    use super::*;
    use serde_json::json;

    fn tool_attrs() -> SpanAttrs {
        SpanAttrs::Tool(ToolAttrs {
            function: "demo::random".to_string(),
            mode: ToolMode::Live,
            status: SpanStatus::Ok,
            request: CallArgs::new(),
            response: Some(json!(0.42)),
            error: None,
            extra: Map::new(),
        })
    }

    #[test]
    fn test_pending_span_finish_uses_context() {
        let ctx = ExecutionContext {
            run_id: Some("run-1".to_string()),
            node_id: Some("random".to_string()),
            checkpoint_id: Some("cp-1".to_string()),
            ..Default::default()
        };
        let span = PendingSpan::start(KIND_TOOL, "random", "fp").finish(tool_attrs(), &ctx, None);

        assert_eq!(span.run_id.as_deref(), Some("run-1"));
        assert_eq!(span.node_id.as_deref(), Some("random"));
        assert_eq!(span.checkpoint_id.as_deref(), Some("cp-1"));
        assert!(span.end >= span.start);
        assert!(span.is_ok());
    }

    #[test]
    fn test_node_override() {
        let ctx = ExecutionContext {
            node_id: Some("outer".to_string()),
            ..Default::default()
        };
        let span = PendingSpan::start(KIND_NODE, "inner", "fp").finish(
            SpanAttrs::Other(Map::new()),
            &ctx,
            Some("inner"),
        );
        assert_eq!(span.node_id.as_deref(), Some("inner"));
    }

    #[test]
    fn test_span_json_selects_attrs_by_kind() {
        let span = PendingSpan::start(KIND_TOOL, "random", "fp").finish(
            tool_attrs(),
            &ExecutionContext::default(),
            None,
        );
        let json = serde_json::to_value(&span).unwrap();
        assert_eq!(json["attrs"]["mode"], json!("live"));
        assert_eq!(json["attrs"]["request"], json!({"args": [], "kwargs": {}}));

        let parsed: Span = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, span);
        assert!(parsed.attrs.as_tool().is_some());
    }

    #[test]
    fn test_node_attrs_decode() {
        let attrs = SpanAttrs::from_kind(
            KIND_NODE,
            json!({"function": "f", "status": "error", "before_state": {"step": 1}, "error": "boom"}),
        );
        let node = attrs.as_node().unwrap();
        assert_eq!(node.status, SpanStatus::Error);
        assert_eq!(node.before_state, Some(json!({"step": 1})));
        assert!(node.after_state.is_none());
    }

    #[test]
    fn test_unknown_kind_keeps_fields() {
        let attrs = SpanAttrs::from_kind("http", json!({"status": "ok", "url": "https://example.com"}));
        assert!(matches!(attrs, SpanAttrs::Other(_)));
        assert_eq!(attrs.status(), Some(SpanStatus::Ok));
        assert_eq!(attrs.field("url"), Some(json!("https://example.com")));
    }

    #[test]
    fn test_extra_fields_survive() {
        let attrs = SpanAttrs::from_kind(
            KIND_TOOL,
            json!({
                "function": "f", "mode": "stubbed", "status": "ok",
                "request": {"args": [], "kwargs": {}}, "response": 1, "latency_class": "fast"
            }),
        );
        let tool = attrs.as_tool().unwrap();
        assert_eq!(tool.extra.get("latency_class"), Some(&json!("fast")));
    }

    #[test]
    fn test_unfinished_span_is_rejected() {
        let json = json!({
            "id": "s1", "kind": "tool", "name": "t", "start": "2024-01-01T00:00:00Z",
            "end": null, "attrs": {}, "fingerprint": "fp"
        });
        assert!(serde_json::from_value::<Span>(json).is_err());
    }

    #[test]
    fn test_null_response_survives_roundtrip() {
        let attrs = SpanAttrs::from_kind(
            KIND_TOOL,
            json!({
                "function": "f", "mode": "live", "status": "ok",
                "request": {"args": [], "kwargs": {}}, "response": null
            }),
        );
        assert_eq!(attrs.as_tool().unwrap().response, Some(Value::Null));
    }

    #[test]
    fn test_artifact_threshold() {
        let small = json!({"a": 1});
        assert!(Artifact::above_threshold(&small, None).is_none());
        assert!(Artifact::above_threshold(&small, Some(1024)).is_none());

        let artifact = Artifact::above_threshold(&small, Some(2)).unwrap();
        assert_eq!(artifact.size, canonical_json(&small).len() as u64);
        assert_eq!(artifact.uri, format!("sha256:{}", artifact.sha256));
        assert_eq!(artifact, Artifact::from_json(&small));
    }
}
