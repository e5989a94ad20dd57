use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by ingestion, retrieval and corpus management.
///
/// A query that finds nothing answerable is not an error; see
/// [`crate::rag::QueryOutcome::NoResult`].
#[derive(Error, Debug)]
pub enum RagError {
    #[error("failed to load document {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("unsupported document format {mime_type} for {path}")]
    UnsupportedFormat { path: PathBuf, mime_type: String },

    #[error("embedding provider failed: {0}")]
    Embedding(String),

    #[error("vector index persistence failed: {0}")]
    IndexPersistence(String),

    #[error("language model failed: {0}")]
    LanguageModel(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Whether retrying the same call might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RagError::LanguageModel(_) | RagError::Embedding(_) | RagError::Timeout { .. }
        )
    }

    /// Map a file-system error on `path` onto the taxonomy, keeping
    /// "not found" and "permission denied" distinguishable from other failures.
    pub fn from_fs(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => RagError::DocumentNotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => RagError::PermissionDenied(path.to_string()),
            _ => RagError::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
