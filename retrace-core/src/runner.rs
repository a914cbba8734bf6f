//! Run execution and comparison
//!
//! [`RunExecutor`] turns one execution of an instrumented graph into a stored
//! [`Run`]: the body runs inside a context scope carrying the run id, and every
//! span it produced is drained from the recorder into the repository whether the
//! body succeeds or fails. [`diff_runs`] loads two stored runs and compares them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::context::{ContextScope, ReplayPolicy};
use crate::diff::{DiffEngine, SpanDiff};
use crate::error::{Result, TraceError};
use crate::span::SpanRecorder;
use crate::store::{Run, RunRepository, RunStatus};
use crate::stub::StubRegistry;

/// Parameters of a new run
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub thread_id: Option<String>,
    pub policy: Option<ReplayPolicy>,
    pub graph_signature: Option<String>,
    pub metadata: Map<String, Value>,
}

impl RunRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn policy(mut self, policy: ReplayPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn graph_signature(mut self, signature: impl Into<String>) -> Self {
        self.graph_signature = Some(signature.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A completed run and the body's output
#[derive(Debug, Clone)]
pub struct RunOutcome<T> {
    pub run: Run,
    pub output: T,
    pub span_count: usize,
}

/// Executes run bodies and persists their spans
#[derive(Clone)]
pub struct RunExecutor {
    repo: Arc<dyn RunRepository>,
    recorder: Arc<SpanRecorder>,
    default_policy: ReplayPolicy,
}

impl std::fmt::Debug for RunExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunExecutor")
            .field("default_policy", &self.default_policy)
            .finish()
    }
}

impl RunExecutor {
    pub fn new(repo: Arc<dyn RunRepository>, recorder: Arc<SpanRecorder>) -> Self {
        Self {
            repo,
            recorder,
            default_policy: ReplayPolicy::default(),
        }
    }

    /// Policy for requests that do not name one
    pub fn with_default_policy(mut self, policy: ReplayPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn repository(&self) -> &Arc<dyn RunRepository> {
        &self.repo
    }

    /// Execute `body` as a new run.
    ///
    /// The body receives the run record and runs entirely inside the run's
    /// context scope. A body error marks the run failed and surfaces as
    /// [`TraceError::RunFailed`]; its spans are stored either way. If the spans
    /// cannot be stored, the run is still marked failed and the storage error
    /// is returned.
    pub async fn execute<T, E, F, Fut>(&self, request: RunRequest, body: F) -> Result<RunOutcome<T>>
    where
        E: Display,
        F: FnOnce(Run) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let policy = request.policy.unwrap_or(self.default_policy);
        let thread_id = request
            .thread_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut run = Run::new(thread_id, policy);
        run.graph_signature = request.graph_signature;
        run.metadata = request.metadata;

        self.repo.create_run(&run).await?;
        info!(run_id = %run.id, thread_id = %run.thread_id, policy = %policy, "run started");

        let scoped_run = run.clone();
        let result = ContextScope::new()
            .run_id(run.id.clone())
            .policy(policy)
            .run(async move { body(scoped_run).await })
            .await;

        let spans = self.recorder.drain_run(&run.id);
        let span_count = spans.len();
        let persisted = self.repo.append_spans(&run.id, &spans).await;

        // a run whose spans were lost is failed even if the body succeeded
        run.status = if result.is_ok() && persisted.is_ok() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        self.repo.update_run(&run).await?;

        if let Err(e) = persisted {
            warn!(run_id = %run.id, spans = span_count, error = %e, "failed to persist spans");
            return Err(e);
        }

        match result {
            Ok(output) => {
                info!(run_id = %run.id, spans = span_count, "run completed");
                Ok(RunOutcome {
                    run,
                    output,
                    span_count,
                })
            }
            Err(e) => {
                warn!(run_id = %run.id, spans = span_count, error = %e, "run failed");
                Err(TraceError::RunFailed {
                    run_id: run.id,
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Comparison of two stored runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    pub left_run: Run,
    pub right_run: Run,
    #[serde(flatten)]
    pub diff: SpanDiff,
}

async fn load_run(repo: &dyn RunRepository, id: &str) -> Result<Run> {
    repo.get_run(id)
        .await?
        .ok_or_else(|| TraceError::RunNotFound(id.to_string()))
}

/// Diff the spans of two stored runs
pub async fn diff_runs(
    repo: &dyn RunRepository,
    left_id: &str,
    right_id: &str,
    engine: &DiffEngine,
) -> Result<DiffReport> {
    let left_run = load_run(repo, left_id).await?;
    let right_run = load_run(repo, right_id).await?;
    let left = repo.list_spans(left_id).await?;
    let right = repo.list_spans(right_id).await?;

    Ok(DiffReport {
        left_run,
        right_run,
        diff: engine.diff_spans(&left, &right),
    })
}

/// Register the tool responses of a stored run as stubs, returning how many
pub async fn seed_from_run(
    repo: &dyn RunRepository,
    run_id: &str,
    stubs: &StubRegistry,
) -> Result<usize> {
    load_run(repo, run_id).await?;
    let spans = repo.list_spans(run_id).await?;
    Ok(stubs.seed_from_spans(&spans))
}
