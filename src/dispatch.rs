//! Bounded fan-out of remote invocations, one per prompt.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::agent::RemoteAgent;
use crate::consts::{DEFAULT_INVOKE_TIMEOUT, DEFAULT_MAX_CONCURRENCY, ERROR_PREFIX};
use crate::error::{BatchError, RemoteError};

/// One prompt and what came back for it.
///
/// A failed invocation is not an error here: its output is the failure
/// text prefixed with `ERROR: `. `failed` is what marks the row, since a
/// genuine reply may start with the same prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    pub input: String,
    pub output: String,
    pub failed: bool,
}

impl ResultRow {
    pub fn succeeded(input: String, output: String) -> Self {
        Self {
            input,
            output,
            failed: false,
        }
    }

    pub fn failed(input: String, reason: impl std::fmt::Display) -> Self {
        Self {
            input,
            output: format!("{ERROR_PREFIX}{reason}"),
            failed: true,
        }
    }

    pub fn is_error(&self) -> bool {
        self.failed
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Invocations allowed in flight at once. Zero is treated as one.
    pub max_concurrency: usize,
    pub invoke_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
        }
    }
}

/// Runs prompts against a [`RemoteAgent`] with at most
/// `max_concurrency` calls in flight.
pub struct Dispatcher {
    agent: Arc<dyn RemoteAgent>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(agent: Arc<dyn RemoteAgent>, config: DispatchConfig) -> Self {
        Self { agent, config }
    }

    /// Invoke the agent once per prompt and collect every row.
    ///
    /// Rows come back in completion order, not input order. `on_row` is
    /// called as each row lands. Row failures never abort siblings; the
    /// only error is a worker task that died without producing a row.
    pub async fn dispatch<F>(
        &self,
        prompts: Vec<String>,
        mut on_row: F,
    ) -> Result<Vec<ResultRow>, BatchError>
    where
        F: FnMut(&ResultRow),
    {
        let limit = self.config.max_concurrency.max(1);
        let total = prompts.len();
        let mut rows = Vec::with_capacity(total);
        let mut workers = JoinSet::new();

        for prompt in prompts {
            // Wait for a free slot before starting the next call.
            while workers.len() >= limit {
                let row = next_row(&mut workers).await?;
                on_row(&row);
                rows.push(row);
            }
            let agent = Arc::clone(&self.agent);
            let timeout = self.config.invoke_timeout;
            workers.spawn(invoke_one(agent, prompt, timeout));
        }

        while !workers.is_empty() {
            let row = next_row(&mut workers).await?;
            on_row(&row);
            rows.push(row);
        }

        debug!(rows = rows.len(), total, "dispatch finished");
        Ok(rows)
    }
}

async fn next_row(workers: &mut JoinSet<ResultRow>) -> Result<ResultRow, BatchError> {
    match workers.join_next().await {
        Some(Ok(row)) => Ok(row),
        Some(Err(e)) => {
            workers.abort_all();
            Err(BatchError::Orchestration(format!("worker task failed: {e}")))
        }
        None => Err(BatchError::Orchestration("worker pool drained early".to_string())),
    }
}

async fn invoke_one(agent: Arc<dyn RemoteAgent>, prompt: String, timeout: Duration) -> ResultRow {
    let call = AssertUnwindSafe(agent.invoke(&prompt)).catch_unwind();
    let outcome = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(RemoteError::Malformed("agent panicked".to_string())),
        Err(_) => Err(RemoteError::Timeout(timeout)),
    };
    match outcome {
        Ok(output) => ResultRow::succeeded(prompt, output),
        Err(e) => {
            warn!(error = %e, "remote invocation failed");
            ResultRow::failed(prompt, e)
        }
    }
}
