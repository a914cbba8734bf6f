//! File-backed run repository
//!
//! Layout under the data directory:
//!
//! ```text
//! runs/<run_id>.json     one run record, rewritten on update
//! spans/<run_id>.jsonl   one span per line, append only
//! ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{Run, RunRepository};
use crate::error::{Result, TraceError};
use crate::span::Span;

/// Stores runs as JSON files and spans as JSON lines
#[derive(Debug)]
pub struct JsonlRunStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlRunStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join("runs")).await?;
        tokio::fs::create_dir_all(root.join("spans")).await?;
        tracing::debug!(root = %root.display(), "opened run store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.root.join("runs").join(format!("{}.json", checked_id(id)?)))
    }

    fn spans_path(&self, run_id: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join("spans")
            .join(format!("{}.jsonl", checked_id(run_id)?)))
    }

    async fn write_run(&self, path: &Path, run: &Run) -> Result<()> {
        let body = serde_json::to_vec_pretty(run)?;
        tokio::fs::write(path, body).await?;
        Ok(())
    }
}

/// Run ids become file names, so they may not contain path syntax
fn checked_id(id: &str) -> Result<&str> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\'])
        && !id.contains('\0');
    if valid {
        Ok(id)
    } else {
        Err(TraceError::Storage(format!("Invalid run id: {:?}", id)))
    }
}

#[async_trait]
impl RunRepository for JsonlRunStore {
    async fn create_run(&self, run: &Run) -> Result<()> {
        let path = self.run_path(&run.id)?;
        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(&path).await? {
            return Err(TraceError::Storage(format!("Run {} already exists", run.id)));
        }
        self.write_run(&path, run).await
    }

    async fn update_run(&self, run: &Run) -> Result<()> {
        let path = self.run_path(&run.id)?;
        let _guard = self.write_lock.lock().await;
        if !tokio::fs::try_exists(&path).await? {
            return Err(TraceError::RunNotFound(run.id.clone()));
        }
        self.write_run(&path, run).await
    }

    async fn get_run(&self, id: &str) -> Result<Option<Run>> {
        let path = self.run_path(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_runs(&self) -> Result<Vec<Run>> {
        let mut runs = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.join("runs")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Run>(&bytes) {
                Ok(run) => runs.push(run),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable run file"),
            }
        }
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn append_spans(&self, run_id: &str, spans: &[Span]) -> Result<()> {
        let path = self.spans_path(run_id)?;
        let mut buffer = Vec::new();
        for span in spans {
            serde_json::to_writer(&mut buffer, span)?;
            buffer.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&buffer).await?;
        file.flush().await?;
        tracing::debug!(run_id, count = spans.len(), "spans appended");
        Ok(())
    }

    async fn list_spans(&self, run_id: &str) -> Result<Vec<Span>> {
        let path = self.spans_path(run_id)?;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut spans = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let span = serde_json::from_str(line).map_err(|e| {
                TraceError::Storage(format!(
                    "{}:{}: {}",
                    path.display(),
                    line_no + 1,
                    e
                ))
            })?;
            spans.push(span);
        }
        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_repository_contract() {
        let dir = TempDir::new().unwrap();
        let store = JsonlRunStore::open(dir.path()).await.unwrap();
        test_support::exercise(&store).await;
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let run = crate::store::Run::new("t", crate::context::ReplayPolicy::Strict);
        {
            let store = JsonlRunStore::open(dir.path()).await.unwrap();
            store.create_run(&run).await.unwrap();
            store
                .append_spans(&run.id, &[test_support::span(&run.id, "a")])
                .await
                .unwrap();
        }

        let reopened = JsonlRunStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get_run(&run.id).await.unwrap(), Some(run.clone()));
        assert_eq!(reopened.list_spans(&run.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let store = JsonlRunStore::open(dir.path()).await.unwrap();
        let span = test_support::span("r1", "a");
        let line = serde_json::to_string(&span).unwrap();
        tokio::fs::write(
            dir.path().join("spans").join("r1.jsonl"),
            format!("\n{}\n\n", line),
        )
        .await
        .unwrap();

        let spans = store.list_spans("r1").await.unwrap();
        assert_eq!(spans, vec![span]);
    }

    #[tokio::test]
    async fn test_corrupt_line_reports_position() {
        let dir = TempDir::new().unwrap();
        let store = JsonlRunStore::open(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("spans").join("r1.jsonl"), "{not json}\n")
            .await
            .unwrap();

        let err = store.list_spans("r1").await.unwrap_err();
        assert!(err.to_string().contains(":1:"));
    }

    #[tokio::test]
    async fn test_path_like_ids_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = JsonlRunStore::open(dir.path()).await.unwrap();
        assert!(store.get_run("../escape").await.is_err());
        assert!(store.list_spans("..").await.is_err());
    }
}
