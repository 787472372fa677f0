use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::JobStore;
use crate::job::{JobRecord, ensure_transition};

struct Entry {
    record: JobRecord,
    updated_at: DateTime<Utc>,
}

/// Process-local job store for tests. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Entry>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job_id: Uuid, record: &JobRecord) -> Result<()> {
        record.validate()?;
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job_id) {
            bail!("job {job_id} already exists");
        }
        jobs.insert(
            job_id,
            Entry {
                record: record.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn update(&self, job_id: Uuid, record: &JobRecord) -> Result<()> {
        record.validate()?;
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow!("job {job_id} not found"))?;
        ensure_transition(&job_id.to_string(), entry.record.status, record.status)?;
        entry.record = record.clone();
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        Ok(self
            .jobs
            .read()
            .await
            .get(&job_id)
            .map(|entry| entry.record.clone()))
    }

    async fn stale(&self, before: DateTime<Utc>) -> Result<Vec<Uuid>> {
        Ok(self
            .jobs
            .read()
            .await
            .iter()
            .filter(|(_, entry)| !entry.record.status.is_terminal() && entry.updated_at < before)
            .map(|(id, _)| *id)
            .collect())
    }
}
