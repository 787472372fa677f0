//! Startup banner and job summary display.

use std::path::Path;

use crate::consts::{AUTHOR, REPO, format_number};
use crate::job::{JobRecord, JobStatus};

/// Run configuration for display in the startup banner.
pub struct BannerInfo<'a> {
    pub engine: &'a str,
    pub concurrency: usize,
    pub store: &'a str,
    pub results_dir: &'a Path,
}

/// Print the startup banner with run info.
pub fn print_banner(info: &BannerInfo) {
    eprintln!(
        r#"
   relay {}
   by        {}
   repo      {}
   engine    {}
   parallel  {}
   store     {}
   results   {}
"#,
        env!("CARGO_PKG_VERSION"),
        AUTHOR,
        REPO,
        info.engine,
        info.concurrency,
        info.store,
        info.results_dir.display(),
    );
}

/// Row tallies for a finished job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub total: u64,
    pub failed: u64,
}

/// One-paragraph summary of a finished job.
pub fn job_summary(job_id: &str, record: &JobRecord, counts: RowCounts) -> String {
    let mut out = format!("job       {job_id}\nstatus    {}", record.status);
    if counts.total > 0 {
        out.push_str(&format!(
            "\nrows      {} ({} failed)",
            format_number(counts.total),
            format_number(counts.failed)
        ));
    }
    match record.status {
        JobStatus::Completed => {
            if let Some(url) = &record.result_url {
                out.push_str(&format!("\nresult    {url}"));
            }
        }
        JobStatus::Failed => {
            if let Some(error) = &record.error {
                out.push_str(&format!("\nerror     {error}"));
            }
        }
        JobStatus::Pending | JobStatus::Running => {}
    }
    out
}
