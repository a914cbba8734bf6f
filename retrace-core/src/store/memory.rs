//! In-memory run repository

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{Run, RunRepository};
use crate::error::{Result, TraceError};
use crate::span::Span;

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<String, Run>,
    spans: HashMap<String, Vec<Span>>,
}

/// Keeps runs and spans in process memory
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    inner: RwLock<Inner>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RunRepository for InMemoryRunStore {
    async fn create_run(&self, run: &Run) -> Result<()> {
        let mut inner = self.write();
        if inner.runs.contains_key(&run.id) {
            return Err(TraceError::Storage(format!("Run {} already exists", run.id)));
        }
        inner.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &Run) -> Result<()> {
        let mut inner = self.write();
        match inner.runs.get_mut(&run.id) {
            Some(stored) => {
                *stored = run.clone();
                Ok(())
            }
            None => Err(TraceError::RunNotFound(run.id.clone())),
        }
    }

    async fn get_run(&self, id: &str) -> Result<Option<Run>> {
        Ok(self.read().runs.get(id).cloned())
    }

    async fn list_runs(&self) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self.read().runs.values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn append_spans(&self, run_id: &str, spans: &[Span]) -> Result<()> {
        self.write()
            .spans
            .entry(run_id.to_string())
            .or_default()
            .extend_from_slice(spans);
        Ok(())
    }

    async fn list_spans(&self, run_id: &str) -> Result<Vec<Span>> {
        Ok(self.read().spans.get(run_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support;

    #[tokio::test]
    async fn test_repository_contract() {
        let store = InMemoryRunStore::new();
        test_support::exercise(&store).await;
    }
}
