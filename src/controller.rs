//! Batch job lifecycle.
//!
//! `submit` persists a Pending record and pushes a job description onto a
//! queue; a runner task drains the queue and spawns one worker task per job.
//! The submitter gets the job id back immediately and learns everything else
//! by polling `status`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::RemoteAgent;
use crate::artifact::ArtifactWriter;
use crate::config::BatchConfig;
use crate::consts::STATUS_ROUTE;
use crate::dispatch::{DispatchConfig, Dispatcher};
use crate::error::BatchError;
use crate::events::{Event, EventBus};
use crate::input::parse_prompts;
use crate::job::{JobRecord, JobStatus};
use crate::store::JobStore;

/// Error recorded on jobs failed by [`BatchController::recover_stale`].
pub const INTERRUPTED_ERROR: &str = "job interrupted before completion";

/// What a submitter gets back: `{job_id, status_url}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub status_url: String,
}

/// A queued job: its id, its prompts, and the agent to run them against.
struct QueuedJob {
    job_id: Uuid,
    prompts: Vec<String>,
    agent: Arc<dyn RemoteAgent>,
}

/// Everything a job's worker task needs. Cheap to clone.
#[derive(Clone)]
struct Worker {
    store: Arc<dyn JobStore>,
    artifacts: ArtifactWriter,
    dispatch: DispatchConfig,
    events: Arc<EventBus>,
}

pub struct BatchController {
    store: Arc<dyn JobStore>,
    artifacts: ArtifactWriter,
    events: Arc<EventBus>,
    queue: mpsc::UnboundedSender<QueuedJob>,
}

impl BatchController {
    /// Build a controller and start its job runner on the current Tokio
    /// runtime.
    pub fn new(store: Arc<dyn JobStore>, config: BatchConfig) -> Self {
        Self::with_events(store, config, Arc::new(EventBus::default()))
    }

    pub fn with_events(store: Arc<dyn JobStore>, config: BatchConfig, events: Arc<EventBus>) -> Self {
        let artifacts = ArtifactWriter::new(config.results_dir.clone());
        let worker = Worker {
            store: Arc::clone(&store),
            artifacts: artifacts.clone(),
            dispatch: config.dispatch(),
            events: Arc::clone(&events),
        };
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_queue(rx, worker));

        Self {
            store,
            artifacts,
            events,
            queue,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Accept a batch and schedule it. Returns before any remote call runs.
    ///
    /// Result rows of the finished job are in completion order, which need
    /// not match the order of `prompts`.
    pub async fn submit(
        &self,
        agent: Arc<dyn RemoteAgent>,
        prompts: Vec<String>,
    ) -> Result<JobHandle, BatchError> {
        if prompts.is_empty() {
            return Err(BatchError::InvalidInput(
                "input contains no usable rows".to_string(),
            ));
        }

        let job_id = Uuid::new_v4();
        let rows = prompts.len();
        self.store.create(job_id, &JobRecord::pending()).await?;
        self.events.emit(Event::StatusChanged {
            job_id,
            status: JobStatus::Pending,
        });

        let job = QueuedJob {
            job_id,
            prompts,
            agent,
        };
        if self.queue.send(job).is_err() {
            // Pending -> Failed is allowed; the job never started.
            self.store
                .update(job_id, &JobRecord::failed("job runner unavailable"))
                .await?;
            return Err(BatchError::Orchestration(
                "job runner unavailable".to_string(),
            ));
        }

        info!(%job_id, rows, "job submitted");
        Ok(JobHandle {
            job_id,
            status_url: format!("{STATUS_ROUTE}/{job_id}"),
        })
    }

    /// Parse an uploaded CSV (first column = prompt) and submit it.
    pub async fn submit_csv(
        &self,
        agent: Arc<dyn RemoteAgent>,
        content: &[u8],
    ) -> Result<JobHandle, BatchError> {
        let prompts = parse_prompts(content)?;
        self.submit(agent, prompts).await
    }

    pub async fn status(&self, job_id: &str) -> Result<JobRecord, BatchError> {
        let id = parse_job_id(job_id)?;
        self.store
            .get(id)
            .await?
            .ok_or_else(|| BatchError::NotFound(job_id.to_string()))
    }

    /// Path of a completed job's artifact.
    pub async fn result(&self, job_id: &str) -> Result<PathBuf, BatchError> {
        let record = self.status(job_id).await?;
        if record.status != JobStatus::Completed {
            return Err(BatchError::NotReady {
                job_id: job_id.to_string(),
                status: record.status,
            });
        }
        record
            .result_url
            .as_deref()
            .and_then(|url| self.artifacts.resolve(url))
            .ok_or_else(|| BatchError::NotFound(format!("artifact for job {job_id}")))
    }

    /// Poll until the job reaches a terminal status.
    pub async fn wait(&self, job_id: &str, interval: Duration) -> Result<JobRecord, BatchError> {
        loop {
            let record = self.status(job_id).await?;
            if record.status.is_terminal() {
                return Ok(record);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Fail every Pending/Running job whose record has not changed for
    /// `max_age`. Nothing heartbeats a running job, so `max_age` must exceed
    /// the longest batch you expect to run.
    pub async fn recover_stale(&self, max_age: Duration) -> Result<Vec<Uuid>, BatchError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| BatchError::InvalidInput(format!("max age out of range: {e}")))?;
        let cutoff = Utc::now() - max_age;

        let mut recovered = Vec::new();
        for job_id in self.store.stale(cutoff).await? {
            match self
                .store
                .update(job_id, &JobRecord::failed(INTERRUPTED_ERROR))
                .await
            {
                Ok(()) => {
                    warn!(%job_id, "marked stale job as failed");
                    self.events.emit(Event::StatusChanged {
                        job_id,
                        status: JobStatus::Failed,
                    });
                    recovered.push(job_id);
                }
                // Finished between the scan and the update.
                Err(e) => debug!(%job_id, error = %e, "skipping stale job"),
            }
        }
        Ok(recovered)
    }
}

fn parse_job_id(job_id: &str) -> Result<Uuid, BatchError> {
    Uuid::parse_str(job_id).map_err(|_| BatchError::NotFound(job_id.to_string()))
}

async fn run_queue(mut rx: mpsc::UnboundedReceiver<QueuedJob>, worker: Worker) {
    while let Some(job) = rx.recv().await {
        let worker = worker.clone();
        tokio::spawn(async move { worker.process(job).await });
    }
    debug!("job queue closed");
}

impl Worker {
    async fn transition(&self, job_id: Uuid, record: &JobRecord) -> anyhow::Result<()> {
        self.store.update(job_id, record).await?;
        self.events.emit(Event::StatusChanged {
            job_id,
            status: record.status,
        });
        Ok(())
    }

    async fn process(self, job: QueuedJob) {
        let job_id = job.job_id;

        if let Err(e) = self.transition(job_id, &JobRecord::running()).await {
            error!(%job_id, error = %e, "failed to mark job running");
            if let Err(e) = self.transition(job_id, &JobRecord::failed(format!("{e:#}"))).await {
                error!(%job_id, error = %e, "failed to record job failure");
            }
            return;
        }

        // Run the job in its own task so a panic fails the job instead of
        // leaving it Running forever.
        let worker = self.clone();
        let outcome = tokio::spawn(async move { worker.execute(job).await }).await;
        let record = match outcome {
            Ok(Ok(result_url)) => JobRecord::completed(result_url),
            Ok(Err(e)) => JobRecord::failed(e.to_string()),
            Err(e) => JobRecord::failed(format!("job worker crashed: {e}")),
        };

        match &record.error {
            None => info!(%job_id, "job completed"),
            Some(reason) => error!(%job_id, error = %reason, "job failed"),
        }
        if let Err(e) = self.transition(job_id, &record).await {
            error!(%job_id, error = %e, "failed to persist final job status");
            if record.status == JobStatus::Completed {
                let failed = JobRecord::failed(format!("failed to persist completion: {e:#}"));
                if let Err(e) = self.transition(job_id, &failed).await {
                    error!(%job_id, error = %e, "failed to record job failure");
                }
            }
        }
    }

    async fn execute(&self, job: QueuedJob) -> Result<String, BatchError> {
        let QueuedJob {
            job_id,
            prompts,
            agent,
        } = job;
        let total = prompts.len();
        info!(%job_id, rows = total, "job running");

        let dispatcher = Dispatcher::new(agent, self.dispatch.clone());
        let mut done = 0;
        let rows = dispatcher
            .dispatch(prompts, |row| {
                done += 1;
                self.events.emit(Event::RowFinished {
                    job_id,
                    done,
                    total,
                    failed: row.is_error(),
                });
            })
            .await?;

        let failed = rows.iter().filter(|r| r.is_error()).count();
        info!(%job_id, rows = rows.len(), failed, "all rows finished");

        let artifacts = self.artifacts.clone();
        tokio::task::spawn_blocking(move || artifacts.write(job_id, &rows))
            .await
            .map_err(|e| BatchError::Orchestration(format!("artifact writer crashed: {e}")))?
            .map_err(|e| BatchError::Orchestration(format!("{e:#}")))
    }
}
