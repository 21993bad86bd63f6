//! Retry wrapper around a reasoning backend.
//!
//! Transient failures (timeout, rate limit, transport, 5xx) are retried
//! with bounded backoff scaled by the attempt number. Unauthorized and
//! malformed-request failures propagate immediately. Every attempt is
//! logged with latency, and successes with token usage.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use planforge_utils::ReasoningError;

use crate::types::{ReasoningBackend, ReasoningRequest, ReasoningResult};

/// Retry budget and backoff shape for the gateway.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempt budget (1 = no retries).
    pub max_attempts: u32,
    /// First delay; attempt N waits `initial_backoff * N`.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// The single entry point the pipeline uses for reasoning calls.
pub struct Gateway {
    backend: Arc<dyn ReasoningBackend>,
    policy: RetryPolicy,
}

impl Gateway {
    #[must_use]
    pub fn new(backend: Arc<dyn ReasoningBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// Backend name, for artifact headers.
    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Execute one reasoning call under the retry policy.
    pub async fn execute(
        &self,
        request: ReasoningRequest,
    ) -> Result<ReasoningResult, ReasoningError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            match self.backend.invoke(request.clone()).await {
                Ok(result) => {
                    debug!(
                        backend = self.backend.name(),
                        attempt,
                        latency_ms = started.elapsed().as_millis() as u64,
                        model = %result.model,
                        tokens_input = result.tokens_input,
                        tokens_output = result.tokens_output,
                        "reasoning call succeeded"
                    );
                    return Ok(result);
                }
                Err(error) if error.is_transient() && attempt < self.policy.max_attempts => {
                    let backoff = self.policy.initial_backoff * attempt;
                    warn!(
                        backend = self.backend.name(),
                        attempt,
                        latency_ms = started.elapsed().as_millis() as u64,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "transient reasoning failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(error) => {
                    warn!(
                        backend = self.backend.name(),
                        attempt,
                        latency_ms = started.elapsed().as_millis() as u64,
                        transient = error.is_transient(),
                        error = %error,
                        "reasoning call failed terminally"
                    );
                    return Err(error);
                }
            }
        }
    }
}
