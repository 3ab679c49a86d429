//! Long-running polling worker.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::batch::{BatchLimit, BatchReport, BatchRunner, StopReason};
use crate::jobs::JobType;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Totals across every pass a worker made.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub passes: u64,
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    pub deferred: usize,
    pub discarded: usize,
    /// Batches that ended in a collaborator error.
    pub errors: u64,
}

impl WorkerStats {
    fn absorb(&mut self, report: &BatchReport) {
        self.processed += report.processed;
        self.completed += report.completed;
        self.failed += report.failed;
        self.deferred += report.deferred;
        self.discarded += report.discarded;
    }
}

/// Cycles over job types, running one batch per type per pass.
///
/// After a pass in which every batch ran dry or was throttled, the worker sleeps for the
/// poll interval (or the longest `retry_after` a rate limit asked for, if larger). It stops
/// when the shutdown token is cancelled; an in-flight batch is allowed to finish.
pub struct Worker {
    runner: Arc<BatchRunner>,
    job_types: Vec<JobType>,
    poll_interval: Duration,
    batch_limit: BatchLimit,
}

impl Worker {
    pub fn new(runner: Arc<BatchRunner>) -> Self {
        let job_types = runner.job_types();
        Self {
            runner,
            job_types,
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_limit: BatchLimit::UntilEmpty,
        }
    }

    pub fn with_job_types(mut self, job_types: Vec<JobType>) -> Self {
        self.job_types = job_types;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_limit(mut self, limit: BatchLimit) -> Self {
        self.batch_limit = limit;
        self
    }

    /// One batch per job type. Returns the delay before the next pass, zero when some
    /// batch stopped with work still queued.
    pub async fn run_once(&self, stats: &mut WorkerStats) -> Duration {
        let mut idle = true;
        let mut delay = self.poll_interval;

        for &job_type in &self.job_types {
            match self.runner.run_batch(job_type, self.batch_limit).await {
                Ok(report) => {
                    stats.absorb(&report);
                    match report.stop {
                        StopReason::LimitReached => idle = false,
                        StopReason::RateLimited {
                            retry_after: Some(after),
                        } => delay = delay.max(after),
                        _ => {}
                    }
                }
                Err(e) => {
                    stats.errors += 1;
                    warn!(job_type = job_type.as_str(), error = %e, "batch failed");
                }
            }
        }
        stats.passes += 1;

        if idle {
            delay
        } else {
            Duration::ZERO
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> WorkerStats {
        info!(
            provider = self.runner.provider_name(),
            job_types = ?self.job_types,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "worker started"
        );
        let mut stats = WorkerStats::default();

        while !shutdown.is_cancelled() {
            let delay = self.run_once(&mut stats).await;
            if delay.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            debug!(delay_ms = delay.as_millis() as u64, "worker idle");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!(
            passes = stats.passes,
            completed = stats.completed,
            failed = stats.failed,
            deferred = stats.deferred,
            "worker stopped"
        );
        stats
    }

    /// Run on a spawned task; cancel `shutdown` and await the handle to stop.
    pub fn start(
        self: Arc<Self>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<WorkerStats> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
