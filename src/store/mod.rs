pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::job::JobRecord;

/// Where job records live. One record per job id.
///
/// Each job has a single writer (its runner task) but any number of
/// concurrent readers. `create` and `update` must be durable before they
/// return, and `get` must observe the last completed `update`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record. Fails if the id already exists.
    async fn create(&self, job_id: Uuid, record: &JobRecord) -> Result<()>;

    /// Replace the record. Fails for unknown ids and for transitions the
    /// state machine forbids.
    async fn update(&self, job_id: Uuid, record: &JobRecord) -> Result<()>;

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>>;

    /// Non-terminal jobs whose record has not changed since `before`.
    async fn stale(&self, before: DateTime<Utc>) -> Result<Vec<Uuid>>;
}
