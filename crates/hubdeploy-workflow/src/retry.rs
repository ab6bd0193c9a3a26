//! Activity retry policy with exponential backoff.

use std::future::Future;
use std::time::Duration;

use hubdeploy_core::WorkflowConfig;
use tracing::warn;

use crate::context::ActivityContext;
use crate::error::{WorkflowError, WorkflowResult};

const BACKOFF_COEFFICIENT: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            initial_interval: Duration::from_millis(config.retry_initial_ms),
            max_interval: Duration::from_millis(config.retry_max_ms),
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = BACKOFF_COEFFICIENT.saturating_pow(attempt.saturating_sub(1));
        self.initial_interval
            .saturating_mul(factor)
            .min(self.max_interval)
    }

    /// Run `op` until it succeeds, fails with a final error, the attempts
    /// run out, or `ctx` is cancelled during a backoff.
    pub async fn run<T, F, Fut>(
        &self,
        activity: &str,
        task_id: u64,
        ctx: &ActivityContext,
        mut op: F,
    ) -> WorkflowResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = WorkflowResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }

            let delay = self.backoff(attempt);
            warn!(
                activity,
                task_id,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "activity failed, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancelled() => return Err(WorkflowError::Cancelled(task_id)),
            }
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WorkflowConfig::default())
    }
}
