//! Bounded polling of asynchronous jobs

use mediaforge_core::{ForgeError, Result};
use std::time::Duration;
use tracing::debug;

use crate::context::{CancelToken, RequestContext};
use crate::provider::{GenerationResult, JobId, JobStatus};

/// Drives one job to `Ready`, `Failed` or timeout.
///
/// Each iteration sleeps one interval, then asks the provider for the job's
/// status. At most `max_iterations` status calls are made.
#[derive(Debug, Clone)]
pub struct JobPoller {
    pub provider: String,
    pub interval: Duration,
    pub max_iterations: u32,
}

impl JobPoller {
    pub fn new(provider: &str, interval: Duration, max_iterations: u32) -> Self {
        Self {
            provider: provider.to_string(),
            interval,
            max_iterations: max_iterations.max(1),
        }
    }

    /// Poller configured from the context's interval and ceiling
    pub fn from_context(provider: &str, ctx: &RequestContext) -> Self {
        Self::new(provider, ctx.poll_interval(), ctx.max_poll_iterations)
    }

    pub fn poll<F>(&self, job: &JobId, cancel: &CancelToken, mut status: F) -> Result<GenerationResult>
    where
        F: FnMut(&JobId) -> Result<JobStatus>,
    {
        let mut iterations = 0u32;
        loop {
            cancel.wait(self.interval)?;

            match status(job)? {
                JobStatus::Pending => {
                    iterations += 1;
                    debug!(
                        provider = %self.provider,
                        job = %job,
                        iteration = iterations,
                        max = self.max_iterations,
                        "job pending"
                    );
                    if iterations >= self.max_iterations {
                        return Err(ForgeError::Timeout {
                            job: job.to_string(),
                            polls: iterations,
                        });
                    }
                }
                JobStatus::Ready(result) => {
                    debug!(provider = %self.provider, job = %job, polls = iterations + 1, "job ready");
                    return Ok(result);
                }
                JobStatus::Failed { reason } => {
                    return Err(ForgeError::ProviderRejected {
                        provider: self.provider.clone(),
                        reason,
                    });
                }
            }
        }
    }
}
