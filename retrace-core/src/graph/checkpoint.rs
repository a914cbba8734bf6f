//! Per-step state checkpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::RwLock;

/// State after one executed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub thread_id: String,
    pub step: usize,
    /// Node that produced this state
    pub node: String,
    /// Node that runs next, or `END`
    pub next: String,
    pub state: Value,
    pub created_at: DateTime<Utc>,
}

/// Keeps every checkpoint in memory
#[derive(Debug, Default)]
pub struct InMemoryCheckpointer {
    checkpoints: RwLock<Vec<Checkpoint>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, checkpoint: Checkpoint) {
        self.checkpoints
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(checkpoint);
    }

    pub fn get(&self, id: &str) -> Option<Checkpoint> {
        self.checkpoints
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|cp| cp.id == id)
            .cloned()
    }

    /// Checkpoints of a thread, newest first
    pub fn history(&self, thread_id: &str) -> Vec<Checkpoint> {
        self.checkpoints
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .rev()
            .filter(|cp| cp.thread_id == thread_id)
            .cloned()
            .collect()
    }

    pub fn latest(&self, thread_id: &str) -> Option<Checkpoint> {
        self.history(thread_id).into_iter().next()
    }
}
