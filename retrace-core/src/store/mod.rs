//! Run and span persistence
//!
//! A [`Run`] is one execution of an instrumented graph. Its spans are appended
//! once the execution finishes and read back in creation order for diffing and
//! replay seeding.

mod jsonl;
mod memory;

pub use jsonl::JsonlRunStore;
pub use memory::InMemoryRunStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::ReplayPolicy;
use crate::error::Result;
use crate::span::Span;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// One execution of an instrumented graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub status: RunStatus,
    /// Topology signature of the executed graph
    #[serde(default)]
    pub graph_signature: Option<String>,
    pub policy: ReplayPolicy,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Run {
    /// A new running run with a fresh id
    pub fn new(thread_id: impl Into<String>, policy: ReplayPolicy) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            status: RunStatus::Running,
            graph_signature: None,
            policy,
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.graph_signature = Some(signature.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Storage for runs and their spans
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Store a new run; fails if the id exists
    async fn create_run(&self, run: &Run) -> Result<()>;

    /// Replace a stored run; fails with `RunNotFound` if it does not exist
    async fn update_run(&self, run: &Run) -> Result<()>;

    async fn get_run(&self, id: &str) -> Result<Option<Run>>;

    /// All runs, newest first
    async fn list_runs(&self) -> Result<Vec<Run>>;

    /// Append spans to a run's feed
    async fn append_spans(&self, run_id: &str, spans: &[Span]) -> Result<()>;

    /// A run's spans in creation order
    async fn list_spans(&self, run_id: &str) -> Result<Vec<Span>>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::fingerprint::CallArgs;
    use crate::span::{KIND_TOOL, PendingSpan, SpanAttrs, SpanStatus, ToolAttrs, ToolMode};
    use serde_json::json;

    pub fn span(run_id: &str, name: &str) -> Span {
        PendingSpan::start(KIND_TOOL, name, format!("fp-{}", name)).finish(
            SpanAttrs::Tool(ToolAttrs {
                function: "f".to_string(),
                mode: ToolMode::Live,
                status: SpanStatus::Ok,
                request: CallArgs::new(),
                response: Some(json!(name)),
                error: None,
                extra: Default::default(),
            }),
            &ExecutionContext {
                run_id: Some(run_id.to_string()),
                ..Default::default()
            },
            None,
        )
    }

    /// Behavior every repository shares
    pub async fn exercise(repo: &dyn RunRepository) {
        let mut first = Run::new("thread-1", ReplayPolicy::Strict);
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = Run::new("thread-2", ReplayPolicy::Hybrid).with_signature("sig");

        repo.create_run(&first).await.unwrap();
        repo.create_run(&second).await.unwrap();
        assert!(repo.create_run(&first).await.is_err());

        let listed = repo.list_runs().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);

        first.status = RunStatus::Completed;
        repo.update_run(&first).await.unwrap();
        let stored = repo.get_run(&first.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert!(repo.get_run("missing").await.unwrap().is_none());
        assert!(repo.update_run(&Run::new("t", ReplayPolicy::Sim)).await.is_err());

        repo.append_spans(&first.id, &[span(&first.id, "a"), span(&first.id, "b")])
            .await
            .unwrap();
        repo.append_spans(&first.id, &[span(&first.id, "c")]).await.unwrap();
        let names: Vec<String> = repo
            .list_spans(&first.id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(repo.list_spans(&second.id).await.unwrap().is_empty());
    }
}
