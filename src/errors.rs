// src/errors.rs

//! Crate-wide error types.
//!
//! `PardagError` covers everything that can stop a run before or during
//! execution. Per-task failures (thrown, timeout, cancelled) are *not*
//! errors in this sense: they are values carried in task outcomes, see
//! [`TaskFailure`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PardagError {
    /// Workflow JSON failed schema validation. `path` points at the
    /// offending element, e.g. `tasks[2].retries`.
    #[error("schema error at {path}: {message}")]
    Schema { path: String, message: String },

    #[error("cycle detected in task DAG involving task '{0}'")]
    Cycle(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("fingerprint error: {0}")]
    Fingerprint(String),

    #[error("cache write error: {0}")]
    CacheWrite(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Scheduler invariant violation. Always a bug, never user input.
    #[error("internal engine error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PardagError {
    pub fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error per the CLI contract:
    /// 2 for workflow construction errors, 3 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Schema { .. } | Self::Cycle(_) | Self::UnknownFunction(_) => 2,
            _ => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, PardagError>;

/// Classification of a failed task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The task function returned an error or panicked.
    Thrown,
    /// The per-task timeout elapsed before the attempt finished.
    Timeout,
    /// The run was cancelled (overall timeout or external signal).
    Cancelled,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thrown => "thrown",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Error descriptor attached to a failed attempt or terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl TaskFailure {
    pub fn thrown(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Thrown,
            message: message.into(),
            traceback: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: message.into(),
            traceback: None,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: message.into(),
            traceback: None,
        }
    }
}
