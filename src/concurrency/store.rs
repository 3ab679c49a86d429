//! Shared slot counters.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::jobs::JobType;
use crate::{Error, Result};

pub type LeaseId = Uuid;

/// Live slot usage as seen by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotCounts {
    pub global: u32,
    pub job_type: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLimits {
    pub global: u32,
    pub job_type: u32,
}

impl SlotLimits {
    /// `min(global headroom, type headroom)`, never negative.
    pub fn available(&self, counts: SlotCounts) -> u32 {
        let global = self.global.saturating_sub(counts.global);
        let typed = self.job_type.saturating_sub(counts.job_type);
        global.min(typed)
    }
}

/// Backend holding the global and per-type counters.
///
/// Implementations must make `try_acquire` atomic across both counters: either both are
/// incremented (and a lease recorded) or neither is. Leases older than their TTL no longer
/// count and must be purged before any read.
#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn counts(&self, job_type: JobType) -> Result<SlotCounts>;

    async fn try_acquire(
        &self,
        job_type: JobType,
        limits: SlotLimits,
        ttl: Duration,
    ) -> Result<Option<LeaseId>>;

    /// Returns `false` if the lease was unknown or had already expired.
    async fn release(&self, lease: LeaseId) -> Result<bool>;
}

#[derive(Debug, Clone, Copy)]
struct LeaseRecord {
    job_type: JobType,
    expires_at: Instant,
}

/// Process-local [`SlotStore`]. Counters are derived from live leases, so a decrement
/// can never drive a counter below zero.
#[derive(Debug, Default)]
pub struct InMemorySlotStore {
    leases: Mutex<HashMap<LeaseId, LeaseRecord>>,
}

impl InMemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<LeaseId, LeaseRecord>>> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| Error::store("slot store mutex poisoned"))?;
        let now = Instant::now();
        let before = leases.len();
        leases.retain(|_, l| l.expires_at > now);
        let expired = before - leases.len();
        if expired > 0 {
            tracing::warn!(expired, "reclaimed expired concurrency leases");
        }
        Ok(leases)
    }

    fn count(leases: &HashMap<LeaseId, LeaseRecord>, job_type: JobType) -> SlotCounts {
        SlotCounts {
            global: leases.len() as u32,
            job_type: leases.values().filter(|l| l.job_type == job_type).count() as u32,
        }
    }
}

#[async_trait]
impl SlotStore for InMemorySlotStore {
    async fn counts(&self, job_type: JobType) -> Result<SlotCounts> {
        let leases = self.lock()?;
        Ok(Self::count(&leases, job_type))
    }

    async fn try_acquire(
        &self,
        job_type: JobType,
        limits: SlotLimits,
        ttl: Duration,
    ) -> Result<Option<LeaseId>> {
        let mut leases = self.lock()?;
        if limits.available(Self::count(&leases, job_type)) == 0 {
            return Ok(None);
        }
        let id = Uuid::new_v4();
        leases.insert(
            id,
            LeaseRecord {
                job_type,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(Some(id))
    }

    async fn release(&self, lease: LeaseId) -> Result<bool> {
        Ok(self.lock()?.remove(&lease).is_some())
    }
}
