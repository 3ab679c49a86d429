//! Per-provider sliding-window rate limiter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use super::window_store::{Admission, InMemoryRateWindowStore, RateWindowStore};
use crate::{Error, Result};

pub const MINUTE_WINDOW: Duration = Duration::from_secs(60);
pub const DAY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
/// Added to every computed wait so the oldest entry has definitely left the window.
pub const DEFAULT_WAIT_BUFFER: Duration = Duration::from_millis(100);

/// Provider request budget. `None` disables that window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateQuota {
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    #[serde(default)]
    pub requests_per_day: Option<u32>,
}

impl RateQuota {
    pub fn per_minute(rpm: u32) -> Self {
        Self {
            requests_per_minute: Some(rpm),
            requests_per_day: None,
        }
    }

    pub fn with_daily_limit(mut self, rpd: u32) -> Self {
        self.requests_per_day = Some(rpd);
        self
    }

    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn is_unlimited(&self) -> bool {
        self.requests_per_minute.is_none() && self.requests_per_day.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterSnapshot {
    pub provider: String,
    pub minute_count: usize,
    pub day_count: usize,
    /// Wait a request issued now would need, if any.
    pub estimated_wait_ms: Option<u64>,
}

/// Sliding-window limiter keyed by provider name.
///
/// Window state lives in a [`RateWindowStore`] shared by every worker. Inside one
/// process each provider also has an async queue lock, held from the first admission
/// attempt until the request is recorded, including any wait in between. Callers for the
/// same provider are therefore admitted one at a time while callers for other providers
/// proceed independently.
pub struct RateLimiter {
    store: Arc<dyn RateWindowStore>,
    queues: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    buffer: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateWindowStore>) -> Self {
        Self {
            store,
            queues: Mutex::new(HashMap::new()),
            buffer: DEFAULT_WAIT_BUFFER,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRateWindowStore::new()))
    }

    pub fn with_buffer(mut self, buffer: Duration) -> Self {
        self.buffer = buffer;
        self
    }

    fn queue(&self, provider: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| Error::store("rate limiter registry poisoned"))?;
        Ok(queues
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    /// Admit one request for `provider`, waiting up to `max_wait` for window space.
    ///
    /// Returns how long the caller was held. Fails with [`Error::RateLimit`] carrying the
    /// required wait when that wait exceeds `max_wait`; nothing is recorded in that case.
    pub async fn check_and_wait(
        &self,
        provider: &str,
        quota: &RateQuota,
        max_wait: Duration,
    ) -> Result<Duration> {
        if quota.is_unlimited() {
            return Ok(Duration::ZERO);
        }

        let queue = self.queue(provider)?;
        let _turn = queue.lock().await;
        let mut waited = Duration::ZERO;

        loop {
            let wait = match self.store.try_admit(provider, quota).await? {
                Admission::Admitted => {
                    debug!(provider, waited_ms = waited.as_millis() as u64, "rate limiter admitted request");
                    return Ok(waited);
                }
                Admission::Wait(wait) => wait,
            };

            let budget = max_wait.saturating_sub(waited);
            if wait > budget {
                info!(
                    provider,
                    wait_ms = wait.as_millis() as u64,
                    max_wait_ms = max_wait.as_millis() as u64,
                    "rate limit wait exceeds budget"
                );
                return Err(Error::rate_limit(
                    provider,
                    format!(
                        "request window full, {:.1}s wait exceeds the {:.1}s budget",
                        wait.as_secs_f64(),
                        max_wait.as_secs_f64()
                    ),
                    Some(wait),
                ));
            }

            info!(
                provider,
                wait_ms = wait.as_millis() as u64,
                "rate limit window full; waiting"
            );
            let pause = wait + self.buffer;
            tokio::time::sleep(pause).await;
            waited += pause;
        }
    }

    /// Count a request that bypassed [`check_and_wait`](Self::check_and_wait), such as a
    /// call-level retry, so the windows match what the provider actually saw.
    pub async fn record(&self, provider: &str, quota: &RateQuota) -> Result<()> {
        if quota.is_unlimited() {
            return Ok(());
        }
        self.store.record(provider, quota).await
    }

    pub async fn snapshot(&self, provider: &str, quota: &RateQuota) -> Result<RateLimiterSnapshot> {
        let status = self.store.status(provider, quota).await?;
        Ok(RateLimiterSnapshot {
            provider: provider.to_string(),
            minute_count: status.minute_count,
            day_count: status.day_count,
            estimated_wait_ms: (!status.wait.is_zero()).then(|| status.wait.as_millis() as u64),
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::in_memory()
    }
}
