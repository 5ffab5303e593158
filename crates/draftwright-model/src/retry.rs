//! Bounded retry around a model client.

use crate::ports::{ModelClient, ModelError, ModelRequest};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
    /// Limit for each attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Longest a single retried call can take: every attempt timing out,
    /// plus the backoff between them.
    #[must_use]
    pub const fn total_budget(&self) -> Duration {
        self.timeout
            .saturating_mul(self.max_retries.saturating_add(1))
            .saturating_add(self.backoff.saturating_mul(self.max_retries))
    }
}

/// Wraps a client with a per-attempt timeout and fixed retries.
///
/// Only transient failures are retried; see `ModelError::is_transient`.
#[derive(Debug, Clone)]
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: ModelClient> RetryingClient<C> {
    pub const fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<C: ModelClient> ModelClient for RetryingClient<C> {
    async fn complete(&self, request: &ModelRequest) -> Result<Value, ModelError> {
        let attempts = self.policy.max_retries + 1;
        let mut attempt = 1;

        loop {
            let outcome = tokio::time::timeout(self.policy.timeout, self.inner.complete(request))
                .await
                .unwrap_or(Err(ModelError::Timeout(self.policy.timeout)));

            let err = match outcome {
                Ok(envelope) => return Ok(envelope),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => err,
            };

            if attempt >= attempts {
                error!(attempts, error = %err, "Model call failed, retries exhausted");
                return Err(err);
            }

            warn!(attempt, of = attempts, error = %err, "Model call failed, retrying");
            tokio::time::sleep(self.policy.backoff).await;
            attempt += 1;
        }
    }
}
