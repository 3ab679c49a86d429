//! Batch runner.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::concurrency::ConcurrencyManager;
use crate::error::JobDisposition;
use crate::jobs::{Job, JobStatus, JobStore, JobType};
use crate::provider::{ChatProvider, RetryingProvider};
use crate::resilience::{RateLimiter, RateQuota, RetryPolicy};
use crate::structured::preview;
use crate::tasks::{Handlers, JobHandler, TaskResult};
use crate::types::{render_transcript, Usage};
use crate::{Error, Result};

/// Default ceiling on how long one call may wait for rate-limit window space.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

/// How many jobs one batch may process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchLimit {
    Count(usize),
    UntilEmpty,
}

/// Why a batch stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No pending jobs of this type remain.
    Exhausted,
    /// The batch processed as many jobs as its [`BatchLimit::Count`] allowed.
    LimitReached,
    /// No concurrency slot was free.
    CapacityReached,
    /// A rate limit was hit; the job that hit it went back to `pending`.
    RateLimited { retry_after: Option<Duration> },
}

impl StopReason {
    /// True when the batch stopped on a limit rather than for lack of work.
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::CapacityReached | Self::RateLimited { .. })
    }
}

/// Outcome of one [`BatchRunner::run_batch`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub job_type: JobType,
    /// Jobs claimed and executed, whatever the outcome.
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    pub deferred: usize,
    /// Results dropped because an operator changed the job while it was running.
    pub discarded: usize,
    pub usage: Usage,
    pub stop: StopReason,
    pub execution_time: Duration,
}

impl BatchReport {
    fn new(job_type: JobType) -> Self {
        Self {
            job_type,
            processed: 0,
            completed: 0,
            failed: 0,
            deferred: 0,
            discarded: 0,
            usage: Usage::default(),
            stop: StopReason::Exhausted,
            execution_time: Duration::ZERO,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.completed as f64 / self.processed as f64
        }
    }
}

/// What one execution saw, kept for the failure message.
#[derive(Default)]
struct CallTrace {
    prompt: Option<String>,
    response: Option<String>,
    usage: Usage,
}

/// Claims jobs of one type and drives each through slot acquisition, rate limiting, the
/// provider call and the task handler, then records the terminal status.
///
/// Every collaborator is injected; nothing here is global.
pub struct BatchRunner {
    jobs: Arc<dyn JobStore>,
    concurrency: Arc<ConcurrencyManager>,
    limiter: Arc<RateLimiter>,
    provider: Arc<dyn ChatProvider>,
    retry: RetryPolicy,
    quota: RateQuota,
    max_wait: Duration,
    handlers: Handlers,
}

impl BatchRunner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        concurrency: Arc<ConcurrencyManager>,
        limiter: Arc<RateLimiter>,
        provider: Arc<dyn ChatProvider>,
        handlers: Handlers,
    ) -> Self {
        Self {
            jobs,
            concurrency,
            limiter,
            provider,
            retry: RetryPolicy::default(),
            quota: RateQuota::unlimited(),
            max_wait: DEFAULT_MAX_WAIT,
            handlers,
        }
    }

    pub fn with_quota(mut self, quota: RateQuota) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Job types this runner has handlers for.
    pub fn job_types(&self) -> Vec<JobType> {
        self.handlers.job_types()
    }

    /// Process pending jobs of `job_type` until `limit`, capacity, a rate limit, or an
    /// empty queue stops the batch.
    ///
    /// Job-level failures are recorded on the job and counted in the report; only
    /// collaborator failures (job store, slot store) are returned as errors.
    pub async fn run_batch(&self, job_type: JobType, limit: BatchLimit) -> Result<BatchReport> {
        let handler = self.handlers.get(job_type).ok_or_else(|| {
            Error::configuration(format!("no handler registered for {} jobs", job_type))
        })?;
        let start = Instant::now();
        let mut report = BatchReport::new(job_type);

        report.stop = loop {
            if let BatchLimit::Count(n) = limit {
                if report.processed >= n {
                    break StopReason::LimitReached;
                }
            }
            if !self.concurrency.can_acquire(job_type).await? {
                break StopReason::CapacityReached;
            }
            let Some(job) = self.jobs.oldest_pending(job_type).await? else {
                break StopReason::Exhausted;
            };
            if !self.jobs.try_claim(job.id).await? {
                debug!(job_id = %job.id, job_type = job_type.as_str(), "job claimed by another worker");
                continue;
            }
            debug!(job_id = %job.id, job_type = job_type.as_str(), "job claimed");

            let lease = match self.concurrency.acquire(job_type).await {
                Ok(lease) => lease,
                Err(e) => {
                    self.jobs.defer(job.id, &e.to_string()).await?;
                    if matches!(e, Error::Capacity { .. }) {
                        info!(job_id = %job.id, job_type = job_type.as_str(), "slot taken before acquire; job returned to pending");
                        break StopReason::CapacityReached;
                    }
                    return Err(e);
                }
            };

            let mut trace = CallTrace::default();
            let outcome = self.execute(handler.as_ref(), &job, &mut trace).await;
            if let Err(e) = lease.release().await {
                warn!(job_id = %job.id, error = %e, "failed to release concurrency slot");
            }

            report.processed += 1;
            report.usage.accumulate(&trace.usage);

            // nothing is persisted for a job an operator took back while it was running
            let outcome = match outcome {
                Ok(result) => match self.jobs.get(job.id).await? {
                    Some(current) if current.status == JobStatus::Processing => {
                        handler.persist(&job, result).await
                    }
                    _ => {
                        report.discarded += 1;
                        warn!(job_id = %job.id, "job changed while running; result discarded");
                        continue;
                    }
                },
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    if self.jobs.complete(job.id).await? {
                        report.completed += 1;
                        info!(
                            job_id = %job.id,
                            job_type = job_type.as_str(),
                            provider = self.provider.name(),
                            total_tokens = trace.usage.total_tokens(),
                            "job completed"
                        );
                    } else {
                        report.discarded += 1;
                        warn!(job_id = %job.id, "job changed while running; result discarded");
                    }
                }
                Err(e) => match e.job_disposition() {
                    JobDisposition::Defer => {
                        if self.jobs.defer(job.id, &e.to_string()).await? {
                            report.deferred += 1;
                        } else {
                            report.discarded += 1;
                        }
                        warn!(
                            job_id = %job.id,
                            job_type = job_type.as_str(),
                            provider = self.provider.name(),
                            error = %e,
                            "rate limited; job returned to pending, stopping batch"
                        );
                        break StopReason::RateLimited {
                            retry_after: e.retry_after(),
                        };
                    }
                    JobDisposition::Fail => {
                        let message = self.failure_message(&e, &trace);
                        if self.jobs.fail(job.id, &message).await? {
                            report.failed += 1;
                        } else {
                            report.discarded += 1;
                        }
                        warn!(
                            job_id = %job.id,
                            job_type = job_type.as_str(),
                            provider = self.provider.name(),
                            model = self.provider.model(),
                            error = %e,
                            "job failed"
                        );
                    }
                },
            }
        };

        report.execution_time = start.elapsed();
        info!(
            job_type = job_type.as_str(),
            processed = report.processed,
            completed = report.completed,
            failed = report.failed,
            deferred = report.deferred,
            stop = ?report.stop,
            "batch finished"
        );
        Ok(report)
    }

    /// Everything that needs the slot: prompt, rate-limited call, parse and validation.
    async fn execute(
        &self,
        handler: &dyn JobHandler,
        job: &Job,
        trace: &mut CallTrace,
    ) -> Result<TaskResult> {
        let request = handler.prepare(job).await?;
        trace.prompt = Some(render_transcript(&request.messages));

        let provider = RetryingProvider::new(self.provider.clone(), self.retry.clone())
            .with_rate_limit(self.limiter.clone(), self.quota, self.max_wait);
        let response = provider.complete(&request).await?;
        trace.usage = response.usage;
        trace.response = Some(response.content.clone());
        if response.is_truncated() {
            warn!(job_id = %job.id, provider = self.provider.name(), "response truncated at token limit");
        }

        handler.parse(job, &response)
    }

    /// `<error> | provider=<p> model=<m> | prompt: <preview> | response: <preview>`
    ///
    /// Every part is bounded, whatever the provider sent back.
    fn failure_message(&self, err: &Error, trace: &CallTrace) -> String {
        format!(
            "{} | provider={} model={} | prompt: {} | response: {}",
            preview(&err.to_string()),
            self.provider.name(),
            self.provider.model(),
            trace.prompt.as_deref().map(preview).unwrap_or_else(|| "-".into()),
            trace.response.as_deref().map(preview).unwrap_or_else(|| "-".into()),
        )
    }
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner")
            .field("provider", &self.provider.name())
            .field("quota", &self.quota)
            .field("retry", &self.retry)
            .field("max_wait", &self.max_wait)
            .field("job_types", &self.job_types())
            .finish()
    }
}
