//! Error types for retrace operations

use crate::graph::GraphError;

/// Result type for retrace operations
pub type Result<T> = std::result::Result<T, TraceError>;

/// Error types for the retrace core
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Run repository failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// A run requested by id does not exist
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// The body of an executed run returned an error
    #[error("Run {run_id} failed: {message}")]
    RunFailed { run_id: String, message: String },

    /// Graph construction or execution error
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for TraceError {
    fn from(s: String) -> Self {
        TraceError::Other(s)
    }
}

impl From<&str> for TraceError {
    fn from(s: &str) -> Self {
        TraceError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for TraceError {
    fn from(err: anyhow::Error) -> Self {
        TraceError::Other(err.to_string())
    }
}
