//! Retry shim for scheduler-driven steps
//!
//! The core never retries storage failures on its own; this helper is the
//! piece a cron/job-queue collaborator wires around the promotion steps.
//! Anything it wraps must be idempotent, which the promotion steps are.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::Result;

/// Bounded-attempt exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Backoff before the second attempt
    pub initial_backoff: Duration,
    /// Backoff multiplier per attempt
    pub multiplier: f64,
    /// Backoff ceiling
    pub max_backoff: Duration,
    /// Jitter fraction in [0, 1); each backoff is scaled by a random factor
    /// in `[1 - jitter, 1 + jitter]` to avoid retry stampedes
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        let capped = base.min(self.max_backoff.as_secs_f64());
        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64(capped * factor)
    }
}

/// Run `op` until it succeeds, fails terminally, or attempts run out
///
/// Only retryable errors (`MnemonError::is_retryable`) trigger another
/// attempt; validation and state errors surface immediately.
pub async fn run_with_retry<T, Fut, F>(policy: &RetryPolicy, name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let backoff = policy.backoff_for(attempt);
                tracing::warn!(
                    step = name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    %err,
                    "step failed, backing off"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::warn!(step = name, attempt, %err, "step failed terminally");
                return Err(err);
            }
        }
    }
}
