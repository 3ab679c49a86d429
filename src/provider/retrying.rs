//! Call-level retry decorator.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ChatProvider, CompletionRequest};
use crate::resilience::{Decision, RateLimiter, RateQuota, RetryPolicy};
use crate::types::ChatCompletionResponse;
use crate::Result;

struct RateGate {
    limiter: Arc<RateLimiter>,
    quota: RateQuota,
    max_wait: Duration,
}

/// Wraps a provider and retries failed calls according to a [`RetryPolicy`].
///
/// Rate-limit failures and transient failures are counted separately. Whatever surfaces
/// after the budget is spent is returned unchanged, so a rate limit stays a
/// `RateLimit` error and everything else stays what the provider reported.
///
/// With [`with_rate_limit`](Self::with_rate_limit) every attempt, retries included, is
/// admitted through the limiter first. A rejected admission is returned as is and never
/// retried here.
pub struct RetryingProvider {
    inner: Arc<dyn ChatProvider>,
    policy: RetryPolicy,
    gate: Option<RateGate>,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn ChatProvider>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            gate: None,
        }
    }

    pub fn with_rate_limit(
        mut self,
        limiter: Arc<RateLimiter>,
        quota: RateQuota,
        max_wait: Duration,
    ) -> Self {
        self.gate = Some(RateGate {
            limiter,
            quota,
            max_wait,
        });
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &Arc<dyn ChatProvider> {
        &self.inner
    }

    async fn admit(&self, attempt: u32) -> Result<()> {
        let Some(gate) = &self.gate else {
            return Ok(());
        };
        let waited = gate
            .limiter
            .check_and_wait(self.name(), &gate.quota, gate.max_wait)
            .await?;
        if !waited.is_zero() {
            debug!(
                provider = self.name(),
                attempt,
                wait_ms = waited.as_millis() as u64,
                "rate limiter delayed call"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ChatProvider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ChatCompletionResponse> {
        let mut rate_limit_failures = 0u32;
        let mut transient_failures = 0u32;
        loop {
            self.admit(rate_limit_failures + transient_failures + 1).await?;
            let err = match self.inner.complete(request).await {
                Ok(resp) => {
                    if rate_limit_failures + transient_failures > 0 {
                        debug!(
                            provider = self.name(),
                            attempts = rate_limit_failures + transient_failures + 1,
                            "provider call succeeded after retry"
                        );
                    }
                    return Ok(resp);
                }
                Err(e) => e,
            };

            if err.is_rate_limit() {
                rate_limit_failures += 1;
            } else if err.is_retryable() {
                transient_failures += 1;
            }

            match self
                .policy
                .decide(&err, rate_limit_failures, transient_failures)
            {
                Decision::Retry { delay } => {
                    warn!(
                        provider = self.name(),
                        model = self.model(),
                        attempt = rate_limit_failures + transient_failures,
                        rate_limited = err.is_rate_limit(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Decision::Fail => return Err(err),
            }
        }
    }
}
