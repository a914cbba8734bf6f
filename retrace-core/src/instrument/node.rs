//! Node-transition wrapper

use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;

use super::Instrumentor;
use crate::context::{ContextScope, ExecutionContext};
use crate::fingerprint::{CanonicalForm, node_fingerprint};
use crate::span::{KIND_NODE, NodeAttrs, PendingSpan, SpanAttrs, SpanStatus};

/// Wraps executions of one graph node
#[derive(Debug, Clone)]
pub struct NodeInstrument {
    inst: Instrumentor,
    name: String,
    function: Option<String>,
}

impl NodeInstrument {
    pub(super) fn new(inst: Instrumentor, name: impl Into<String>) -> Self {
        Self {
            inst,
            name: name.into(),
            function: None,
        }
    }

    /// Identity of the implementing function, part of the fingerprint
    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` on `state` with `node_id` set to this node's name
    pub async fn call<S, E, F, Fut>(&self, state: S, f: F) -> Result<S, E>
    where
        S: Serialize,
        E: Display,
        F: FnOnce(S) -> Fut,
        Fut: Future<Output = Result<S, E>>,
    {
        let function = self
            .function
            .clone()
            .unwrap_or_else(|| std::any::type_name::<F>().to_string());
        let pending = PendingSpan::start(
            KIND_NODE,
            self.name.clone(),
            node_fingerprint(&self.name, &function),
        );
        let before_state = self.snapshot(&state);

        let result = ContextScope::new()
            .node_id(self.name.clone())
            .run(async move { f(state).await })
            .await;

        let (status, after_state, error) = match &result {
            Ok(out) => (SpanStatus::Ok, self.snapshot(out), None),
            Err(err) => (SpanStatus::Error, None, Some(err.to_string())),
        };
        let attrs = SpanAttrs::Node(NodeAttrs {
            function,
            status,
            before_state,
            after_state,
            error,
            extra: Default::default(),
        });
        let span = pending.finish(attrs, &ExecutionContext::current(), Some(&self.name));
        self.inst.emit(span);

        result
    }

    /// Deep copy of a mapping state; anything else is not snapshotted
    fn snapshot<S: Serialize>(&self, state: &S) -> Option<Value> {
        if !self.inst.settings().snapshot_states {
            return None;
        }
        match CanonicalForm::of(state) {
            CanonicalForm::Json(value @ Value::Object(_)) => Some(value),
            _ => None,
        }
    }
}
