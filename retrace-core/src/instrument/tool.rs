//! Tool-call wrapper

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::Instrumentor;
use crate::context::ExecutionContext;
use crate::fingerprint::{CallArgs, canonicalize, fingerprint};
use crate::span::{Artifact, KIND_TOOL, PendingSpan, SpanAttrs, SpanStatus, ToolAttrs, ToolMode};

/// Wraps calls to one named tool
#[derive(Debug, Clone)]
pub struct ToolInstrument {
    inst: Instrumentor,
    name: String,
    kind: String,
    function: Option<String>,
}

impl ToolInstrument {
    pub(super) fn new(inst: Instrumentor, name: impl Into<String>) -> Self {
        Self {
            inst,
            name: name.into(),
            kind: KIND_TOOL.to_string(),
            function: None,
        }
    }

    /// Span kind, `"tool"` unless overridden (e.g. `"http"`)
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Identity recorded as `attrs.function`.
    ///
    /// Defaults to the type name of the closure passed to [`call`](Self::call).
    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fingerprint a call with `args` would carry
    pub fn fingerprint(&self, args: &CallArgs) -> String {
        fingerprint(&self.kind, &self.name, args)
    }

    /// Run `f` under instrumentation.
    ///
    /// A registered stub for the call's fingerprint replaces `f` entirely. If
    /// the stub payload does not decode into `T` the call falls through to live
    /// execution. An error from `f` is recorded and returned as is.
    pub async fn call<T, E, F, Fut>(&self, args: CallArgs, f: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let fp = self.fingerprint(&args);
        let function = self
            .function
            .clone()
            .unwrap_or_else(|| std::any::type_name::<F>().to_string());
        let mut pending = PendingSpan::start(self.kind.clone(), self.name.clone(), fp);
        pending.set_request_artifact(Artifact::above_threshold(
            &args.to_value(),
            self.inst.threshold(),
        ));

        if let Some(stubbed) = self.inst.stubs().get(pending.fingerprint()) {
            match serde_json::from_value::<T>(stubbed.clone()) {
                Ok(value) => {
                    debug!(tool = %self.name, fingerprint = %pending.fingerprint(), "stub hit");
                    pending.set_response_artifact(Artifact::above_threshold(
                        &stubbed,
                        self.inst.threshold(),
                    ));
                    self.finish(pending, function, ToolMode::Stubbed, args, Ok(stubbed));
                    return Ok(value);
                }
                Err(e) => warn!(
                    tool = %self.name,
                    fingerprint = %pending.fingerprint(),
                    error = %e,
                    "stub payload does not decode, calling live"
                ),
            }
        }

        match f().await {
            Ok(value) => {
                let response = canonicalize(&value);
                pending.set_response_artifact(Artifact::above_threshold(
                    &response,
                    self.inst.threshold(),
                ));
                self.finish(pending, function, ToolMode::Live, args, Ok(response));
                Ok(value)
            }
            Err(err) => {
                self.finish(pending, function, ToolMode::Live, args, Err(err.to_string()));
                Err(err)
            }
        }
    }

    fn finish(
        &self,
        pending: PendingSpan,
        function: String,
        mode: ToolMode,
        request: CallArgs,
        outcome: Result<serde_json::Value, String>,
    ) {
        let (status, response, error) = match outcome {
            Ok(response) => (SpanStatus::Ok, Some(response), None),
            Err(error) => (SpanStatus::Error, None, Some(error)),
        };
        let attrs = SpanAttrs::Tool(ToolAttrs {
            function,
            mode,
            status,
            request,
            response,
            error,
            extra: Default::default(),
        });
        let span = pending.finish(attrs, &ExecutionContext::current(), None);
        self.inst.emit(span);
    }
}

/// Boxed tool function
pub type ToolFn<I, O, E> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O, E>> + Send + Sync>;

/// A tool function bound to its instrumentation.
///
/// Arguments are derived from the input value with [`CallArgs::from_input`].
pub struct InstrumentedTool<I, O, E> {
    instrument: ToolInstrument,
    func: ToolFn<I, O, E>,
}

impl<I, O, E> Clone for InstrumentedTool<I, O, E> {
    fn clone(&self) -> Self {
        Self {
            instrument: self.instrument.clone(),
            func: self.func.clone(),
        }
    }
}

impl<I, O, E> std::fmt::Debug for InstrumentedTool<I, O, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedTool")
            .field("instrument", &self.instrument)
            .finish()
    }
}

impl<I, O, E> InstrumentedTool<I, O, E> {
    pub fn new(instrument: ToolInstrument, func: ToolFn<I, O, E>) -> Self {
        Self { instrument, func }
    }

    pub fn instrument(&self) -> &ToolInstrument {
        &self.instrument
    }
}

impl<I, O, E> InstrumentedTool<I, O, E>
where
    I: Serialize + std::fmt::Debug,
    O: Serialize + DeserializeOwned,
    E: Display,
{
    /// Fingerprint of invoking with `input`
    pub fn fingerprint(&self, input: &I) -> String {
        self.instrument.fingerprint(&CallArgs::from_input(input))
    }

    pub async fn invoke(&self, input: I) -> Result<O, E> {
        let args = CallArgs::from_input(&input);
        let func = self.func.clone();
        self.instrument.call(args, move || func(input)).await
    }
}
