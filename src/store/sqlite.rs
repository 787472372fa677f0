use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use super::JobStore;
use crate::job::{JobRecord, JobStatus, ensure_transition};

/// SQLite-backed job store. Survives restarts.
///
/// Several processes may share the file (one submitting, others polling),
/// so the database runs in WAL mode with a busy timeout.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open or create the jobs table in the given database.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open job database")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        if path != ":memory:" {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })
            .context("failed to enable WAL")?;
        }
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                id         TEXT PRIMARY KEY,
                status     TEXT NOT NULL,
                result_url TEXT,
                error      TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .context("failed to create jobs table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("job store connection poisoned"))
    }
}

fn read_status(conn: &Connection, job_id: &str) -> Result<Option<JobStatus>> {
    let status: Option<String> = conn
        .query_row("SELECT status FROM jobs WHERE id = ?1", [job_id], |row| {
            row.get(0)
        })
        .optional()?;
    status.map(|s| s.parse()).transpose()
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job_id: Uuid, record: &JobRecord) -> Result<()> {
        record.validate()?;
        let id = job_id.to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        if read_status(&conn, &id)?.is_some() {
            bail!("job {id} already exists");
        }
        conn.execute(
            "INSERT INTO jobs (id, status, result_url, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, record.status.as_str(), record.result_url, record.error, now],
        )
        .with_context(|| format!("failed to create job {id}"))?;
        Ok(())
    }

    async fn update(&self, job_id: Uuid, record: &JobRecord) -> Result<()> {
        record.validate()?;
        let id = job_id.to_string();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let current = read_status(&tx, &id)?.ok_or_else(|| anyhow!("job {id} not found"))?;
        ensure_transition(&id, current, record.status)?;
        tx.execute(
            "UPDATE jobs SET status = ?2, result_url = ?3, error = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                id,
                record.status.as_str(),
                record.result_url,
                record.error,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.commit()
            .with_context(|| format!("failed to persist job {id}"))?;
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT status, result_url, error FROM jobs WHERE id = ?1",
                [job_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((status, result_url, error)) => Ok(Some(JobRecord {
                status: status.parse()?,
                result_url,
                error,
            })),
            None => Ok(None),
        }
    }

    async fn stale(&self, before: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, updated_at FROM jobs
             WHERE status IN ('pending', 'running') ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut ids = Vec::new();
        for (id, updated_at) in rows {
            let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                .with_context(|| format!("bad timestamp on job {id}"))?
                .with_timezone(&Utc);
            if updated_at < before {
                ids.push(Uuid::parse_str(&id)?);
            }
        }
        Ok(ids)
    }
}
