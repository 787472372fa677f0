use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::RemoteAgent;
use crate::error::RemoteError;

/// A scripted agent for tests. Echoes its input as `echo: <message>`.
///
/// Inputs listed with [`MockAgent::failing_on`] fail at the transport level,
/// inputs listed with [`MockAgent::in_band_error_on`] "succeed" but carry an
/// error payload. A gate holds every call until permits are released.
#[derive(Default)]
pub struct MockAgent {
    failing: HashSet<String>,
    in_band: HashSet<String>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockAgent {
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn failing_on<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn in_band_error_on<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.in_band.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every call waits for (and consumes) one permit of `gate`.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Calls that have started, including those still waiting.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls ever in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even when a call is dropped by a timeout.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteAgent for MockAgent {
    async fn invoke(&self, message: &str) -> Result<String, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.contains(message) {
            return Err(RemoteError::Status {
                status: 503,
                body: format!("mock failure for {message}"),
            });
        }
        if self.in_band.contains(message) {
            return Err(RemoteError::InBand(format!("mock in-band error for {message}")));
        }
        Ok(format!("echo: {message}"))
    }
}
