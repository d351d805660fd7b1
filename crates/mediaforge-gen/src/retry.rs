//! Retry policies and the per-provider retry executor
//!
//! Two named policies exist because two call paths want different things:
//! whole-provider attempts are re-issued immediately (`NoDelayRetry`), while
//! individual outbound HTTP requests back off exponentially
//! (`ExponentialBackoffRetry`, see [`crate::http`]).

use mediaforge_core::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::context::RequestContext;

/// Decides how long to wait before re-attempting after a failure
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Delay after the failed attempt with zero-based index `attempt`
    fn delay(&self, attempt: u32) -> Duration;
}

/// Retry immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelayRetry;

impl RetryPolicy for NoDelayRetry {
    fn name(&self) -> &'static str {
        "no-delay"
    }

    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Fixed base delay, doubled per attempt, capped at `max_delay`
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoffRetry {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ExponentialBackoffRetry {
    pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
    pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: Duration::from_millis(Self::DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl Default for ExponentialBackoffRetry {
    fn default() -> Self {
        Self::new(Duration::from_millis(Self::DEFAULT_BASE_DELAY_MS))
    }
}

impl RetryPolicy for ExponentialBackoffRetry {
    fn name(&self) -> &'static str {
        "exponential-backoff"
    }

    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Runs one provider attempt (start, plus the poll loop for job providers)
/// and re-runs it from scratch on failure, within a retry budget.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: Arc<dyn RetryPolicy>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(NoDelayRetry)
    }
}

impl RetryExecutor {
    pub fn new(policy: impl RetryPolicy + 'static) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    pub fn with_policy(policy: Arc<dyn RetryPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &dyn RetryPolicy {
        self.policy.as_ref()
    }

    /// Invoke `operation` up to `retries + 1` times.
    ///
    /// `ctx.attempt` is reset to zero and incremented before every retry.
    /// Returns the first success, or the last failure once the budget is
    /// spent. Non-retryable errors (cancellation included) end the loop at
    /// once.
    pub fn execute<T, F>(&self, ctx: &mut RequestContext, retries: u32, mut operation: F) -> Result<T>
    where
        F: FnMut(&RequestContext) -> Result<T>,
    {
        ctx.attempt = 0;
        loop {
            ctx.cancel.check()?;

            let err = match operation(ctx) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_retryable() || ctx.attempt >= retries {
                return Err(err);
            }

            let delay = self.policy.delay(ctx.attempt);
            warn!(
                attempt = ctx.attempt,
                retries,
                delay_ms = delay.as_millis() as u64,
                policy = self.policy.name(),
                error = %err,
                "attempt failed, retrying"
            );
            if !delay.is_zero() {
                ctx.cancel.wait(delay)?;
            }
            ctx.attempt += 1;
            info!(attempt = ctx.attempt, "retry attempt starting");
        }
    }
}
