// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::worker::JobError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Wait between two attempts of the same job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Immediate,
    /// `step`, `2 * step`, `3 * step`, ...
    Linear { step: Duration },
    /// `base`, `2 * base`, `4 * base`, ... capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Backoff::Immediate => Duration::ZERO,
            Backoff::Linear { step } => step.saturating_mul(attempt),
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt - 1);
                base.saturating_mul(factor).min(*max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::exponential(Duration::from_secs(3), Duration::from_secs(300))
    }
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            backoff: Backoff::Immediate,
        }
    }

    pub fn linear(step: Duration) -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Linear { step },
        }
    }

    pub fn exponential(base: Duration, max: Duration) -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Exponential { base, max },
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Drives `op` until it succeeds, is discarded, or runs out of attempts.
    ///
    /// `op` receives the 1-based attempt number. Only `JobError::Retryable`
    /// loops; the last retryable error is returned wrapped in
    /// `JobError::Exhausted` once `max_attempts` is reached.
    pub async fn run<T, F, Fut>(&self, job_name: &str, mut op: F) -> Result<T, JobError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(JobError::Retryable(err)) => {
                    if attempt >= max_attempts {
                        error!("{job_name} | Giving up after {attempt} attempts: {err}");
                        return Err(JobError::Exhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let delay = self.backoff.delay_for(attempt);
                    warn!(
                        "{job_name} | Attempt {attempt}/{max_attempts} failed, retrying in {} ms: {err}",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error!("{job_name} | Not retrying: {err}");
                    return Err(err);
                }
            }
        }
    }
}
