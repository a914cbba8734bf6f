//! Fingerprint-keyed stub responses
//!
//! The tool wrapper consults the registry before running a call; on an exact
//! fingerprint match the stored response is returned instead. Seeding the
//! registry from a recorded run replays that run's tool outputs.

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::span::{KIND_NODE, Span, SpanAttrs, SpanStatus};

static GLOBAL_STUBS: Lazy<Arc<StubRegistry>> = Lazy::new(|| Arc::new(StubRegistry::new()));

/// Registry of canned responses by fingerprint
#[derive(Debug, Default)]
pub struct StubRegistry {
    responses: RwLock<HashMap<String, Value>>,
}

impl StubRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry shared by every execution path
    pub fn global() -> Arc<StubRegistry> {
        GLOBAL_STUBS.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.responses.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.responses.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a response, replacing any previous one for the fingerprint
    pub fn add(&self, fingerprint: impl Into<String>, response: Value) {
        let fingerprint = fingerprint.into();
        tracing::debug!(fingerprint = %fingerprint, "stub registered");
        self.write().insert(fingerprint, response);
    }

    /// Exact-match lookup
    pub fn get(&self, fingerprint: &str) -> Option<Value> {
        self.read().get(fingerprint).cloned()
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.read().contains_key(fingerprint)
    }

    /// Remove one stub, returning its response
    pub fn remove(&self, fingerprint: &str) -> Option<Value> {
        self.write().remove(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop every stub
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Register many stubs at once
    pub fn extend(&self, stubs: impl IntoIterator<Item = (String, Value)>) {
        self.write().extend(stubs);
    }

    /// Register the response of every successful, non-node span.
    ///
    /// Later spans overwrite earlier ones with the same fingerprint. Returns the
    /// number of spans registered.
    pub fn seed_from_spans<'a>(&self, spans: impl IntoIterator<Item = &'a Span>) -> usize {
        let mut count = 0;
        let mut responses = self.write();
        for span in spans {
            if span.kind == KIND_NODE || span.status() != Some(SpanStatus::Ok) {
                continue;
            }
            let response = match &span.attrs {
                SpanAttrs::Tool(attrs) => attrs.response.clone(),
                other => other.field("response"),
            };
            if let Some(response) = response {
                responses.insert(span.fingerprint.clone(), response);
                count += 1;
            }
        }
        tracing::debug!(count, "stubs seeded from spans");
        count
    }
}

#[cfg(test)]
mod stub_tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::fingerprint::CallArgs;
    use crate::span::{NodeAttrs, PendingSpan, ToolAttrs, ToolMode};
    use serde_json::json;

    #[test]
    fn test_add_and_get() {
        let stubs = StubRegistry::new();
        assert!(stubs.get("fp").is_none());

        stubs.add("fp", json!(0.9));
        assert_eq!(stubs.get("fp"), Some(json!(0.9)));
        assert_eq!(stubs.get("fp"), Some(json!(0.9)));
        assert!(stubs.contains("fp"));
    }

    #[test]
    fn test_overwrite() {
        let stubs = StubRegistry::new();
        stubs.add("fp", json!(1));
        stubs.add("fp", json!(2));
        assert_eq!(stubs.get("fp"), Some(json!(2)));
        assert_eq!(stubs.len(), 1);
    }

    #[test]
    fn test_exact_match_only() {
        let stubs = StubRegistry::new();
        stubs.add("abcdef", json!(true));
        assert!(stubs.get("abcde").is_none());
        assert!(stubs.get("ABCDEF").is_none());
    }

    #[test]
    fn test_remove_and_clear() {
        let stubs = StubRegistry::new();
        stubs.extend(vec![("a".to_string(), json!(1)), ("b".to_string(), json!(2))]);
        assert_eq!(stubs.remove("a"), Some(json!(1)));
        assert!(!stubs.contains("a"));
        stubs.clear();
        assert!(stubs.is_empty());
    }

    #[test]
    fn test_concurrent_add_get() {
        let stubs = Arc::new(StubRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let stubs = stubs.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("{}-{}", t, i);
                        stubs.add(key.clone(), json!(i));
                        assert_eq!(stubs.get(&key), Some(json!(i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stubs.len(), 800);
    }

    #[test]
    fn test_seed_from_spans() {
        let ctx = ExecutionContext::default();
        let ok_tool = PendingSpan::start("tool", "random", "fp-ok").finish(
            SpanAttrs::Tool(ToolAttrs {
                function: "f".to_string(),
                mode: ToolMode::Live,
                status: SpanStatus::Ok,
                request: CallArgs::new(),
                response: Some(json!(0.25)),
                error: None,
                extra: Default::default(),
            }),
            &ctx,
            None,
        );
        let failed_tool = PendingSpan::start("tool", "fetch", "fp-err").finish(
            SpanAttrs::Tool(ToolAttrs {
                function: "f".to_string(),
                mode: ToolMode::Live,
                status: SpanStatus::Error,
                request: CallArgs::new(),
                response: None,
                error: Some("timeout".to_string()),
                extra: Default::default(),
            }),
            &ctx,
            None,
        );
        let node = PendingSpan::start("node", "random", "fp-node").finish(
            SpanAttrs::Node(NodeAttrs {
                function: "f".to_string(),
                status: SpanStatus::Ok,
                before_state: Some(json!({})),
                after_state: Some(json!({})),
                error: None,
                extra: Default::default(),
            }),
            &ctx,
            None,
        );

        let stubs = StubRegistry::new();
        let count = stubs.seed_from_spans(&[ok_tool, failed_tool, node]);

        assert_eq!(count, 1);
        assert_eq!(stubs.get("fp-ok"), Some(json!(0.25)));
        assert!(!stubs.contains("fp-err"));
        assert!(!stubs.contains("fp-node"));
    }
}
