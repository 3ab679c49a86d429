//! Slot manager and the lease guard handed to callers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::store::{InMemorySlotStore, LeaseId, SlotCounts, SlotLimits, SlotStore};
use crate::jobs::JobType;
use crate::{Error, Result};

/// Leases not released within this window are reclaimed by the store.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyLimits {
    pub global: u32,
    /// Types without an entry are bounded only by the global limit.
    pub per_type: HashMap<JobType, u32>,
}

impl ConcurrencyLimits {
    pub fn new(global: u32) -> Self {
        Self {
            global,
            per_type: HashMap::new(),
        }
    }

    pub fn with_limit(mut self, job_type: JobType, limit: u32) -> Self {
        self.per_type.insert(job_type, limit);
        self
    }

    pub fn limit_for(&self, job_type: JobType) -> u32 {
        self.per_type.get(&job_type).copied().unwrap_or(self.global)
    }

    pub fn slot_limits(&self, job_type: JobType) -> SlotLimits {
        SlotLimits {
            global: self.global,
            job_type: self.limit_for(job_type),
        }
    }
}

/// Two-tier slot accounting shared by all workers.
pub struct ConcurrencyManager {
    store: Arc<dyn SlotStore>,
    limits: ConcurrencyLimits,
    lease_ttl: Duration,
}

impl ConcurrencyManager {
    pub fn new(store: Arc<dyn SlotStore>, limits: ConcurrencyLimits) -> Self {
        Self {
            store,
            limits,
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }

    pub fn in_memory(limits: ConcurrencyLimits) -> Self {
        Self::new(Arc::new(InMemorySlotStore::new()), limits)
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn limits(&self) -> &ConcurrencyLimits {
        &self.limits
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    pub async fn counts(&self, job_type: JobType) -> Result<SlotCounts> {
        self.store.counts(job_type).await
    }

    /// Fast pre-check. Not atomic with [`acquire`](Self::acquire): another worker may take
    /// the last slot in between, which `acquire` reports as [`Error::Capacity`].
    pub async fn can_acquire(&self, job_type: JobType) -> Result<bool> {
        Ok(self.available_slots(job_type).await? > 0)
    }

    pub async fn available_slots(&self, job_type: JobType) -> Result<u32> {
        let counts = self.store.counts(job_type).await?;
        Ok(self.limits.slot_limits(job_type).available(counts))
    }

    pub async fn acquire(&self, job_type: JobType) -> Result<SlotLease> {
        let limits = self.limits.slot_limits(job_type);
        match self
            .store
            .try_acquire(job_type, limits, self.lease_ttl)
            .await?
        {
            Some(id) => {
                debug!(job_type = job_type.as_str(), lease = %id, "concurrency slot acquired");
                Ok(SlotLease {
                    id,
                    job_type,
                    store: self.store.clone(),
                    released: false,
                })
            }
            None => Err(Error::Capacity {
                job_type: job_type.to_string(),
            }),
        }
    }
}

/// A held concurrency slot.
///
/// Call [`release`](Self::release) on the normal path. If the lease is dropped without it
/// (early return, panic, cancelled future) the release is spawned on the current Tokio
/// runtime; outside a runtime the store's TTL reclaims the slot.
pub struct SlotLease {
    id: LeaseId,
    job_type: JobType,
    store: Arc<dyn SlotStore>,
    released: bool,
}

impl SlotLease {
    pub fn id(&self) -> LeaseId {
        self.id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        if !self.store.release(self.id).await? {
            warn!(
                job_type = self.job_type.as_str(),
                lease = %self.id,
                "lease already expired before release"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for SlotLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotLease")
            .field("id", &self.id)
            .field("job_type", &self.job_type)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let id = self.id;
        let job_type = self.job_type;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.release(id).await {
                        warn!(job_type = job_type.as_str(), lease = %id, error = %e, "failed to release dropped lease");
                    }
                });
            }
            Err(_) => {
                warn!(
                    job_type = job_type.as_str(),
                    lease = %id,
                    "lease dropped outside a runtime; relying on TTL"
                );
            }
        }
    }
}
