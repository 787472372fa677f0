//! Project-wide constants.

use std::path::PathBuf;
use std::time::Duration;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const HOMEPAGE: &str = env!("CARGO_PKG_HOMEPAGE");
pub const REPO: &str = env!("CARGO_PKG_REPOSITORY");

/// Remote calls in flight per job. Keeps us under the agent engine quota.
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Upper bound for a single remote invocation.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(300);

/// How often `relay submit` polls the job record while waiting.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default Vertex AI region when none is configured.
pub const DEFAULT_LOCATION: &str = "us-central1";

/// Prefix of every row output that carries a failure instead of agent text.
pub const ERROR_PREFIX: &str = "ERROR: ";

/// Header row of every result artifact.
pub const ARTIFACT_HEADER: [&str; 2] = ["Input", "Output"];

/// Route prefix for status handles handed back on submit.
pub const STATUS_ROUTE: &str = "/api/batch_status";

/// Route prefix for result artifacts.
pub const RESULTS_ROUTE: &str = "/results";

/// Remote user id for batch sessions.
pub const BATCH_USER_ID: &str = "batch_job";

/// Remote user id for single-message chat sessions.
pub const CHAT_USER_ID: &str = "web_app";

/// Default data directory: `~/.relay`.
/// Holds the job database and the results directory.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".relay")
}

/// Default database path: `~/.relay/relay.db`.
pub fn default_db_path() -> PathBuf {
    default_data_dir().join("relay.db")
}

/// Default results directory: `~/.relay/results`.
pub fn default_results_dir() -> PathBuf {
    default_data_dir().join("results")
}

/// Format a number with comma separators (e.g. 1,234,567).
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}
