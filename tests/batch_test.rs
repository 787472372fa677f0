use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay::agent::RemoteAgent;
use relay::agent::mock::MockAgent;
use relay::config::BatchConfig;
use relay::controller::BatchController;
use relay::error::{BatchError, RemoteError};
use relay::events::Event;
use relay::job::{JobRecord, JobStatus};
use relay::store::JobStore;
use relay::store::sqlite::SqliteJobStore;
use tokio::sync::Semaphore;
use uuid::Uuid;

const POLL: Duration = Duration::from_millis(5);

fn build_controller(results_dir: &Path, max_concurrency: usize) -> BatchController {
    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::in_memory().unwrap());
    let config = BatchConfig {
        max_concurrency,
        invoke_timeout: Duration::from_secs(5),
        results_dir: results_dir.to_path_buf(),
    };
    BatchController::new(store, config)
}

fn prompts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Read an artifact back as (input, output) pairs, header excluded.
fn read_artifact(path: &Path) -> Vec<(String, String)> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.iter().collect::<Vec<_>>(), vec!["Input", "Output"]);
    reader
        .records()
        .map(|r| {
            let r = r.unwrap();
            (r[0].to_string(), r[1].to_string())
        })
        .collect()
}

async fn wait(controller: &BatchController, job_id: &str) -> JobRecord {
    tokio::time::timeout(Duration::from_secs(10), controller.wait(job_id, POLL))
        .await
        .expect("job did not finish in time")
        .unwrap()
}

#[tokio::test]
async fn one_failing_row_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(dir.path(), 5);
    let agent = Arc::new(MockAgent::echo().failing_on(["b"]));

    let handle = controller
        .submit(agent, prompts(&["a", "b", "c"]))
        .await
        .unwrap();
    let job_id = handle.job_id.to_string();

    let record = wait(&controller, &job_id).await;
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.result_url, Some(format!("/results/{job_id}.csv")));
    assert!(record.error.is_none());

    let mut rows = read_artifact(&controller.result(&job_id).await.unwrap());
    rows.sort();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.iter().filter(|(_, out)| out.starts_with("ERROR:")).count(), 1);
    assert_eq!(rows[0], ("a".to_string(), "echo: a".to_string()));
    assert!(rows[1].1.starts_with("ERROR: "));
    assert_eq!(rows[2], ("c".to_string(), "echo: c".to_string()));
}

#[tokio::test]
async fn in_band_errors_are_row_failures() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(dir.path(), 2);
    let agent = Arc::new(MockAgent::echo().in_band_error_on(["x"]));

    let handle = controller.submit(agent, prompts(&["x", "y"])).await.unwrap();
    let job_id = handle.job_id.to_string();
    assert_eq!(wait(&controller, &job_id).await.status, JobStatus::Completed);

    let rows = read_artifact(&controller.result(&job_id).await.unwrap());
    let failed: Vec<_> = rows.iter().filter(|(_, out)| out.starts_with("ERROR:")).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, "x");
    assert!(failed[0].1.contains("in-band"));
}

#[tokio::test]
async fn every_row_failing_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(dir.path(), 5);
    let agent = Arc::new(MockAgent::echo().failing_on(["a", "b"]));

    let handle = controller.submit(agent, prompts(&["a", "b"])).await.unwrap();
    let record = wait(&controller, &handle.job_id.to_string()).await;
    assert_eq!(record.status, JobStatus::Completed);
}

#[tokio::test]
async fn submit_returns_before_rows_run() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(dir.path(), 5);
    let gate = Arc::new(Semaphore::new(0));
    let agent = Arc::new(MockAgent::echo().with_gate(Arc::clone(&gate)));
    let input: Vec<String> = (0..8).map(|i| format!("row {i}")).collect();

    let handle = controller
        .submit(Arc::clone(&agent) as Arc<dyn RemoteAgent>, input)
        .await
        .unwrap();
    let job_id = handle.job_id.to_string();

    // Nothing can have finished: every call is parked on the gate.
    let record = controller.status(&job_id).await.unwrap();
    assert!(!record.status.is_terminal());

    gate.add_permits(8);
    let record = wait(&controller, &job_id).await;
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(agent.calls(), 8);
    assert_eq!(read_artifact(&controller.result(&job_id).await.unwrap()).len(), 8);
}

#[tokio::test]
async fn in_flight_calls_never_exceed_limit() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(dir.path(), 3);
    let agent = Arc::new(MockAgent::echo().with_delay(Duration::from_millis(10)));
    let input: Vec<String> = (0..20).map(|i| format!("p{i}")).collect();

    let handle = controller
        .submit(Arc::clone(&agent) as Arc<dyn RemoteAgent>, input)
        .await
        .unwrap();
    let job_id = handle.job_id.to_string();
    wait(&controller, &job_id).await;

    assert_eq!(agent.calls(), 20);
    assert!(agent.max_in_flight() <= 3, "saw {}", agent.max_in_flight());
    assert_eq!(read_artifact(&controller.result(&job_id).await.unwrap()).len(), 20);
}

#[tokio::test]
async fn status_polling_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(dir.path(), 5);
    let handle = controller
        .submit(Arc::new(MockAgent::echo()), prompts(&["a"]))
        .await
        .unwrap();
    let job_id = handle.job_id.to_string();
    let first = wait(&controller, &job_id).await;

    for _ in 0..5 {
        assert_eq!(controller.status(&job_id).await.unwrap(), first);
    }
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(dir.path(), 5);
    let unknown = uuid::Uuid::new_v4().to_string();

    assert!(matches!(
        controller.status(&unknown).await,
        Err(BatchError::NotFound(_))
    ));
    assert!(matches!(
        controller.result(&unknown).await,
        Err(BatchError::NotFound(_))
    ));
}

#[tokio::test]
async fn result_of_unfinished_job_is_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(dir.path(), 5);
    let gate = Arc::new(Semaphore::new(0));
    let agent = Arc::new(MockAgent::echo().with_gate(Arc::clone(&gate)));

    let handle = controller.submit(agent, prompts(&["a"])).await.unwrap();
    let job_id = handle.job_id.to_string();

    assert!(matches!(
        controller.result(&job_id).await,
        Err(BatchError::NotReady { .. })
    ));
    gate.add_permits(1);
    wait(&controller, &job_id).await;
    assert!(controller.result(&job_id).await.is_ok());
}

#[tokio::test]
async fn empty_csv_is_rejected_without_calls() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(dir.path(), 5);
    let agent = Arc::new(MockAgent::echo());

    for upload in [&b""[..], &b"\n\n"[..], &b" ,ignored\n"[..]] {
        let err = controller
            .submit_csv(Arc::clone(&agent) as Arc<dyn RemoteAgent>, upload)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidInput(_)));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(agent.calls(), 0);
}

#[tokio::test]
async fn csv_upload_uses_first_column() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(dir.path(), 5);
    let upload = b"hello,world\n\"multi\nline\",x\n";

    let handle = controller
        .submit_csv(Arc::new(MockAgent::echo()), upload)
        .await
        .unwrap();
    let job_id = handle.job_id.to_string();
    wait(&controller, &job_id).await;

    let mut rows = read_artifact(&controller.result(&job_id).await.unwrap());
    rows.sort();
    assert_eq!(
        rows,
        vec![
            ("hello".to_string(), "echo: hello".to_string()),
            ("multi\nline".to_string(), "echo: multi\nline".to_string()),
        ]
    );
}

#[tokio::test]
async fn unwritable_results_dir_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("results");
    std::fs::write(&blocker, "a file, not a directory").unwrap();
    let controller = build_controller(&blocker, 5);

    let handle = controller
        .submit(Arc::new(MockAgent::echo()), prompts(&["a"]))
        .await
        .unwrap();
    let job_id = handle.job_id.to_string();

    let record = wait(&controller, &job_id).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.result_url.is_none());
    assert!(record.error.unwrap().contains("results dir"));
}

/// Panics on every call.
struct PanickingAgent;

#[async_trait]
impl RemoteAgent for PanickingAgent {
    async fn invoke(&self, _message: &str) -> Result<String, RemoteError> {
        panic!("agent exploded");
    }
}

#[tokio::test]
async fn panicking_agent_becomes_error_rows() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(dir.path(), 2);

    let handle = controller
        .submit(Arc::new(PanickingAgent), prompts(&["a", "b"]))
        .await
        .unwrap();
    let job_id = handle.job_id.to_string();

    assert_eq!(wait(&controller, &job_id).await.status, JobStatus::Completed);
    let rows = read_artifact(&controller.result(&job_id).await.unwrap());
    assert!(rows.iter().all(|(_, out)| out.starts_with("ERROR:")));
}

#[tokio::test]
async fn events_trace_the_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(dir.path(), 5);
    let mut rx = controller.events().subscribe();

    let handle = controller
        .submit(Arc::new(MockAgent::echo().failing_on(["b"])), prompts(&["a", "b"]))
        .await
        .unwrap();
    wait(&controller, &handle.job_id.to_string()).await;

    let mut statuses = Vec::new();
    let mut rows = 0;
    let mut failed = 0;
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.job_id(), handle.job_id);
        match event {
            Event::StatusChanged { status, .. } => statuses.push(status),
            Event::RowFinished { failed: f, total, .. } => {
                assert_eq!(total, 2);
                rows += 1;
                if f {
                    failed += 1;
                }
            }
        }
    }
    assert_eq!(
        statuses,
        vec![JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
    );
    assert_eq!(rows, 2);
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn concurrent_jobs_stay_separate() {
    let dir = tempfile::tempdir().unwrap();
    let controller = build_controller(dir.path(), 2);
    let agent: Arc<dyn RemoteAgent> = Arc::new(MockAgent::echo());

    let first = controller
        .submit(Arc::clone(&agent), prompts(&["one", "two"]))
        .await
        .unwrap();
    let second = controller
        .submit(Arc::clone(&agent), prompts(&["three"]))
        .await
        .unwrap();
    assert_ne!(first.job_id, second.job_id);

    let first_id = first.job_id.to_string();
    let second_id = second.job_id.to_string();
    wait(&controller, &first_id).await;
    wait(&controller, &second_id).await;

    assert_eq!(read_artifact(&controller.result(&first_id).await.unwrap()).len(), 2);
    assert_eq!(
        read_artifact(&controller.result(&second_id).await.unwrap()),
        vec![("three".to_string(), "echo: three".to_string())]
    );
}

/// Refuses the first Completed write, then behaves normally.
struct RejectsFirstCompletion {
    inner: SqliteJobStore,
    rejected: AtomicBool,
}

#[async_trait]
impl JobStore for RejectsFirstCompletion {
    async fn create(&self, job_id: Uuid, record: &JobRecord) -> anyhow::Result<()> {
        self.inner.create(job_id, record).await
    }

    async fn update(&self, job_id: Uuid, record: &JobRecord) -> anyhow::Result<()> {
        if record.status == JobStatus::Completed && !self.rejected.swap(true, Ordering::SeqCst) {
            anyhow::bail!("disk I/O error");
        }
        self.inner.update(job_id, record).await
    }

    async fn get(&self, job_id: Uuid) -> anyhow::Result<Option<JobRecord>> {
        self.inner.get(job_id).await
    }

    async fn stale(&self, before: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>> {
        self.inner.stale(before).await
    }
}

#[tokio::test]
async fn lost_completion_write_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn JobStore> = Arc::new(RejectsFirstCompletion {
        inner: SqliteJobStore::in_memory().unwrap(),
        rejected: AtomicBool::new(false),
    });
    let controller = BatchController::new(
        store,
        BatchConfig {
            results_dir: dir.path().to_path_buf(),
            ..BatchConfig::default()
        },
    );

    let handle = controller
        .submit(Arc::new(MockAgent::echo()), prompts(&["a"]))
        .await
        .unwrap();
    let job_id = handle.job_id.to_string();

    let record = wait(&controller, &job_id).await;
    assert_eq!(record.status, JobStatus::Failed);
    let error = record.error.unwrap();
    assert!(error.contains("failed to persist completion"));
    assert!(error.contains("disk I/O error"));
    assert!(matches!(
        controller.result(&job_id).await,
        Err(BatchError::NotReady { .. })
    ));
}
