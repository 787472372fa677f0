//! The job record and its state machine.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Lifecycle of a batch job.
///
/// `Pending -> Running -> {Completed, Failed}`. `Pending -> Failed` is only
/// taken when a stale job is recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => bail!("unknown job status: {other}"),
        }
    }
}

/// What a poller sees: `{status, result_url, error}`.
///
/// Build records through the constructors so `result_url` is only set on
/// completed jobs and `error` only on failed ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,
    pub result_url: Option<String>,
    pub error: Option<String>,
}

impl JobRecord {
    pub fn pending() -> Self {
        Self {
            status: JobStatus::Pending,
            result_url: None,
            error: None,
        }
    }

    pub fn running() -> Self {
        Self {
            status: JobStatus::Running,
            result_url: None,
            error: None,
        }
    }

    pub fn completed(result_url: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Completed,
            result_url: Some(result_url.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            result_url: None,
            error: Some(error.into()),
        }
    }

    /// Check that `result_url` is set exactly when completed and `error`
    /// exactly when failed.
    pub fn validate(&self) -> Result<()> {
        let completed = self.status == JobStatus::Completed;
        let failed = self.status == JobStatus::Failed;
        if completed != self.result_url.is_some() {
            bail!("{} job has mismatched result_url {:?}", self.status, self.result_url);
        }
        if failed != self.error.is_some() {
            bail!("{} job has mismatched error {:?}", self.status, self.error);
        }
        Ok(())
    }
}

/// Reject a status change the state machine does not allow.
pub fn ensure_transition(job_id: &str, current: JobStatus, next: JobStatus) -> Result<()> {
    if !current.can_transition_to(next) {
        bail!("job {job_id}: illegal transition {current} -> {next}");
    }
    Ok(())
}
