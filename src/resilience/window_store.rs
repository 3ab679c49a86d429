//! Shared request windows behind the rate limiter.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::rate_limiter::{RateQuota, DAY_WINDOW, MINUTE_WINDOW};
use crate::{Error, Result};

/// Result of one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was recorded and may be sent.
    Admitted,
    /// Nothing was recorded; window space frees up after this long.
    Wait(Duration),
}

/// Window occupancy for one provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateWindowStatus {
    pub minute_count: usize,
    pub day_count: usize,
    /// Wait a request issued now would need.
    pub wait: Duration,
}

/// Backend holding per-provider request timestamps.
///
/// Every worker that talks to the same provider account must share one store, or each
/// of them will spend the full quota. `try_admit` must purge, check and record as one
/// atomic step per provider. Only windows the quota limits are recorded into.
#[async_trait]
pub trait RateWindowStore: Send + Sync {
    async fn try_admit(&self, provider: &str, quota: &RateQuota) -> Result<Admission>;

    /// Record a request that was sent without admission.
    async fn record(&self, provider: &str, quota: &RateQuota) -> Result<()>;

    async fn status(&self, provider: &str, quota: &RateQuota) -> Result<RateWindowStatus>;
}

/// Request timestamps inside the trailing minute and day.
#[derive(Debug, Default)]
struct Windows {
    minute: VecDeque<Instant>,
    day: VecDeque<Instant>,
}

impl Windows {
    fn purge(&mut self, now: Instant) {
        purge_window(&mut self.minute, now, MINUTE_WINDOW);
        purge_window(&mut self.day, now, DAY_WINDOW);
    }

    fn required_wait(&self, quota: &RateQuota, now: Instant) -> Duration {
        let minute = quota
            .requests_per_minute
            .map(|limit| window_wait(&self.minute, limit, now, MINUTE_WINDOW))
            .unwrap_or(Duration::ZERO);
        let day = quota
            .requests_per_day
            .map(|limit| window_wait(&self.day, limit, now, DAY_WINDOW))
            .unwrap_or(Duration::ZERO);
        minute.max(day)
    }

    fn record(&mut self, quota: &RateQuota, now: Instant) {
        if quota.requests_per_minute.is_some() {
            self.minute.push_back(now);
        }
        if quota.requests_per_day.is_some() {
            self.day.push_back(now);
        }
    }

    fn is_empty(&self) -> bool {
        self.minute.is_empty() && self.day.is_empty()
    }
}

fn purge_window(window: &mut VecDeque<Instant>, now: Instant, length: Duration) {
    while let Some(oldest) = window.front() {
        if now.duration_since(*oldest) >= length {
            window.pop_front();
        } else {
            break;
        }
    }
}

fn window_wait(window: &VecDeque<Instant>, limit: u32, now: Instant, length: Duration) -> Duration {
    if (window.len() as u64) < limit as u64 {
        return Duration::ZERO;
    }
    match window.front() {
        Some(oldest) => (*oldest + length).saturating_duration_since(now),
        // a zero limit never admits anything
        None => length,
    }
}

/// Process-local [`RateWindowStore`]. Share one instance (behind an `Arc`) between every
/// limiter in the process.
#[derive(Debug, Default)]
pub struct InMemoryRateWindowStore {
    providers: Mutex<HashMap<String, Windows>>,
}

impl InMemoryRateWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_windows<T>(&self, provider: &str, f: impl FnOnce(&mut Windows, Instant) -> T) -> Result<T> {
        let mut providers = self
            .providers
            .lock()
            .map_err(|_| Error::store("rate window store mutex poisoned"))?;
        let now = Instant::now();
        let windows = providers.entry(provider.to_string()).or_default();
        windows.purge(now);
        let out = f(windows, now);
        if windows.is_empty() {
            providers.remove(provider);
        }
        Ok(out)
    }
}

#[async_trait]
impl RateWindowStore for InMemoryRateWindowStore {
    async fn try_admit(&self, provider: &str, quota: &RateQuota) -> Result<Admission> {
        self.with_windows(provider, |w, now| {
            let wait = w.required_wait(quota, now);
            if wait.is_zero() {
                w.record(quota, now);
                Admission::Admitted
            } else {
                Admission::Wait(wait)
            }
        })
    }

    async fn record(&self, provider: &str, quota: &RateQuota) -> Result<()> {
        self.with_windows(provider, |w, now| w.record(quota, now))
    }

    async fn status(&self, provider: &str, quota: &RateQuota) -> Result<RateWindowStatus> {
        self.with_windows(provider, |w, now| RateWindowStatus {
            minute_count: w.minute.len(),
            day_count: w.day.len(),
            wait: w.required_wait(quota, now),
        })
    }
}
