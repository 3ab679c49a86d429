//! 任务模块：任务记录、状态机与任务存储。
//!
//! # Jobs Module
//!
//! A [`Job`] is one queued unit of AI-assisted work with a durable status.
//!
//! ```text
//! pending ──claim──▶ processing ──▶ completed
//!    ▲                   │  └─────▶ failed
//!    └──── defer ────────┘   (rate limit only)
//! ```
//!
//! The `pending → processing` claim is a compare-and-swap on the status field and is the
//! only thing preventing two workers from calling a provider for the same job.

mod model;
mod store;

pub use model::{Job, JobId, JobPayload, JobStatus, JobType, NewJob};
pub use store::{InMemoryJobStore, JobStore};
