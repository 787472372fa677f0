//! Result artifacts: one CSV per job under the results directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::consts::{ARTIFACT_HEADER, RESULTS_ROUTE};
use crate::dispatch::ResultRow;

/// Writes `<results_dir>/<job_id>.csv` and hands out `/results/<job_id>.csv`
/// as the reference stored on the job.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    results_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    fn file_name(job_id: Uuid) -> String {
        format!("{job_id}.csv")
    }

    /// Public reference for a job's artifact.
    pub fn result_url(job_id: Uuid) -> String {
        format!("{RESULTS_ROUTE}/{}", Self::file_name(job_id))
    }

    /// Write the header and one row per result, in the order given.
    ///
    /// The file is written under a temporary name and renamed into place,
    /// so a reader never sees a half-written artifact.
    pub fn write(&self, job_id: Uuid, rows: &[ResultRow]) -> Result<String> {
        fs::create_dir_all(&self.results_dir).with_context(|| {
            format!("failed to create results dir {}", self.results_dir.display())
        })?;

        let path = self.results_dir.join(Self::file_name(job_id));
        let partial = path.with_extension("csv.part");

        let mut writer = csv::Writer::from_path(&partial)
            .with_context(|| format!("failed to create {}", partial.display()))?;
        writer.write_record(ARTIFACT_HEADER)?;
        for row in rows {
            writer.write_record([row.input.as_str(), row.output.as_str()])?;
        }
        writer.flush()?;
        drop(writer);

        fs::rename(&partial, &path)
            .with_context(|| format!("failed to move artifact into {}", path.display()))?;
        Ok(Self::result_url(job_id))
    }

    /// Map a result reference back to a file on disk.
    ///
    /// Only references of the exact `/results/<uuid>.csv` shape resolve, so
    /// a reference can never point outside the results directory.
    pub fn resolve(&self, result_url: &str) -> Option<PathBuf> {
        let name = result_url
            .strip_prefix(RESULTS_ROUTE)?
            .strip_prefix('/')?;
        let job_id = Uuid::parse_str(name.strip_suffix(".csv")?).ok()?;
        let path = self.results_dir.join(Self::file_name(job_id));
        path.is_file().then_some(path)
    }
}
