//! 并发控制模块：全局与按任务类型的并发槽位。
//!
//! # Concurrency Module
//!
//! Bounds how many jobs run at once, both in aggregate and per [`JobType`](crate::jobs::JobType),
//! across workers that share nothing but a [`SlotStore`].
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ConcurrencyManager`] | `can_acquire` / `acquire` / `available_slots` |
//! | [`SlotLease`] | Scoped slot grant, released on every exit path |
//! | [`SlotStore`] | Shared counter backend with lease expiry |
//! | [`InMemorySlotStore`] | Process-local backend |
//!
//! The manager never blocks: when no slot is free it reports
//! [`Error::Capacity`](crate::Error::Capacity) and leaves polling to the caller.
//!
//! ```rust
//! use ai_job_pipeline::concurrency::{ConcurrencyLimits, ConcurrencyManager};
//! use ai_job_pipeline::jobs::JobType;
//!
//! # async fn demo() -> ai_job_pipeline::Result<()> {
//! let manager = ConcurrencyManager::in_memory(ConcurrencyLimits::new(4).with_limit(JobType::Translation, 2));
//! if manager.can_acquire(JobType::Translation).await? {
//!     let lease = manager.acquire(JobType::Translation).await?;
//!     // ... run the job ...
//!     lease.release().await?;
//! }
//! # Ok(())
//! # }
//! ```

mod manager;
mod store;

pub use manager::{ConcurrencyLimits, ConcurrencyManager, SlotLease, DEFAULT_LEASE_TTL};
pub use store::{InMemorySlotStore, LeaseId, SlotCounts, SlotLimits, SlotStore};
