//! 批处理运行器：认领任务、获取并发槽、限速、调用服务商并记录结果。
//!
//! # Runner Module
//!
//! [`BatchRunner`] ties the pipeline together for one job type:
//!
//! ```text
//! can_acquire? ─▶ claim oldest pending ─▶ acquire slot ─▶ check_and_wait ◀─┐
//!      │                                        │                │          │ retry
//!      └─ stop (capacity)                       │                ▼          │
//!                                               │        provider.complete ─┘
//!                                               │                │
//!                                               │                ▼
//!                                               │         handler.parse
//!                                               ▼                │
//!                                       release slot ◀───────────┘
//!                                               │
//!                                               ▼
//!                          still processing? ─▶ handler.persist ─▶ complete
//!                                  │
//!                                  └─ discard result
//! ```
//!
//! Outcomes map onto the job state machine:
//!
//! | Outcome | Job | Batch |
//! |---------|-----|-------|
//! | success | `completed`, error cleared | continues |
//! | job cancelled while running | untouched, nothing persisted | continues |
//! | rate limit (local window or provider) | back to `pending` | stops |
//! | anything else | `failed` with diagnostics | continues |
//!
//! [`Worker`] runs batches for every job type in a loop until cancelled.

mod batch;
mod worker;

pub use batch::{BatchLimit, BatchReport, BatchRunner, StopReason, DEFAULT_MAX_WAIT};
pub use worker::{Worker, WorkerStats, DEFAULT_POLL_INTERVAL};
