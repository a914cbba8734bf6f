//! Path-local execution context
//!
//! Every span is tagged with the run, node and checkpoint that were active when it
//! was finalized. Those ids live in a task-local slot: a [`ContextScope`] overrides
//! any subset of fields for the duration of a future (or a synchronous closure) and
//! the enclosing values come back when it completes. Spawned tasks and other threads
//! start from the default context, so concurrent execution paths never observe each
//! other's ids.
//!
//! ```rust,ignore
//! use retrace_core::context::{ContextScope, ExecutionContext};
//!
//! ContextScope::new()
//!     .run_id("run-1")
//!     .run(async {
//!         assert_eq!(ExecutionContext::current().run_id.as_deref(), Some("run-1"));
//!     })
//!     .await;
//! ```

use serde::{Deserialize, Serialize};
use tokio::task::futures::TaskLocalFuture;

tokio::task_local! {
    static CURRENT: ExecutionContext;
}

/// Replay policy carried by a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
    /// Recorded fingerprints are expected to match exactly
    #[default]
    Strict,
    /// Stubbed where a recording exists, live otherwise
    Hybrid,
    /// Synthetic providers only
    Sim,
}

impl ReplayPolicy {
    /// Policy name as stored on runs
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplayPolicy::Strict => "strict",
            ReplayPolicy::Hybrid => "hybrid",
            ReplayPolicy::Sim => "sim",
        }
    }
}

impl std::fmt::Display for ReplayPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReplayPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(ReplayPolicy::Strict),
            "hybrid" => Ok(ReplayPolicy::Hybrid),
            "sim" => Ok(ReplayPolicy::Sim),
            other => Err(format!("Invalid replay policy: {}", other)),
        }
    }
}

/// Ambient ids attached to every span
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub run_id: Option<String>,
    pub node_id: Option<String>,
    pub checkpoint_id: Option<String>,
    pub policy: ReplayPolicy,
}

impl ExecutionContext {
    /// The context of the calling execution path, or the default when no scope is active
    pub fn current() -> Self {
        CURRENT.try_with(|ctx| ctx.clone()).unwrap_or_default()
    }
}

/// A pending set of context overrides.
///
/// Unset fields inherit from whatever context is current when the scope is applied
/// with [`run`](Self::run) or [`run_sync`](Self::run_sync).
#[derive(Debug, Clone, Default)]
pub struct ContextScope {
    run_id: Option<String>,
    node_id: Option<String>,
    checkpoint_id: Option<String>,
    policy: Option<ReplayPolicy>,
}

impl ContextScope {
    /// A scope that overrides nothing
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    pub fn policy(mut self, policy: ReplayPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Merge the overrides onto the current context
    pub fn resolve(&self) -> ExecutionContext {
        let parent = ExecutionContext::current();
        ExecutionContext {
            run_id: self.run_id.clone().or(parent.run_id),
            node_id: self.node_id.clone().or(parent.node_id),
            checkpoint_id: self.checkpoint_id.clone().or(parent.checkpoint_id),
            policy: self.policy.unwrap_or(parent.policy),
        }
    }

    /// Drive `fut` with this scope active.
    ///
    /// The overrides are resolved against the caller's context immediately, not
    /// when the returned future is first polled.
    pub fn run<F>(self, fut: F) -> TaskLocalFuture<ExecutionContext, F>
    where
        F: std::future::Future,
    {
        let ctx = self.resolve();
        tracing::trace!(
            run_id = ?ctx.run_id,
            node_id = ?ctx.node_id,
            checkpoint_id = ?ctx.checkpoint_id,
            "entering context scope"
        );
        CURRENT.scope(ctx, fut)
    }

    /// Call `f` with this scope active on the current thread
    pub fn run_sync<R>(self, f: impl FnOnce() -> R) -> R {
        let ctx = self.resolve();
        CURRENT.sync_scope(ctx, f)
    }
}
