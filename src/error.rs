//! Error taxonomy for the batch pipeline.
//!
//! [`RemoteError`] is row-scoped: the dispatcher folds it into the row's
//! output and the job carries on. [`BatchError`] is what callers of the
//! controller see.

use std::time::Duration;

use thiserror::Error;

use crate::job::JobStatus;

/// A single remote agent invocation failed.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("agent engine returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The call went through but the final event carried an `error` field.
    #[error("{0}")]
    InBand(String),

    #[error("no response from agent engine")]
    Empty,

    #[error("malformed agent response: {0}")]
    Malformed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum BatchError {
    /// Missing or empty submission. Raised before a job exists.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job {job_id} has no result yet (status: {status})")]
    NotReady { job_id: String, status: JobStatus },

    /// Failure outside per-row handling. Fails the whole job.
    #[error("orchestration failed: {0}")]
    Orchestration(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl BatchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BatchError::NotFound(_))
    }
}
