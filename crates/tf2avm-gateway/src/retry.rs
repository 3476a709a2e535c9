//! Timeout and retry policy for capability calls

use crate::error::{GatewayError, ProposalError};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Deadline and retry budget for one kind of call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    /// Deadline of a single attempt
    pub timeout: Duration,
    /// Extra attempts after the first
    pub max_retries: u32,
    /// Base delay; retry `n` waits `backoff * 2^(n-1)`
    pub backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl CallPolicy {
    /// With attempt deadline
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// With retry budget
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// With base backoff
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay before retry number `attempt` (1-based), doubling each time
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor)
    }
}

/// Run `call` under `policy`
///
/// Retryable failures are retried up to `max_retries` times. A running
/// attempt is never interrupted by `cancel`; cancellation is observed
/// before each attempt and during backoff.
pub async fn with_retry<T, F, Fut>(
    policy: &CallPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut call: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let result = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(ProposalError::Timeout(format!(
                "{label} exceeded {} ms",
                policy.timeout.as_millis()
            ))
            .into()),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                tracing::warn!(call = label, attempt, error = %err, "retrying capability call");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                    _ = tokio::time::sleep(policy.delay(attempt)) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}
