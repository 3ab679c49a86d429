//! 弹性模块：按服务商的滑动窗口限流与调用级重试策略。
//!
//! # Resilience Module
//!
//! Two independent guards around every provider call:
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Per-provider requests/minute and requests/day sliding windows |
//! | [`window_store`] | Shared window backend so every worker draws on one quota |
//! | [`retry`] | Call-level retry with exponential backoff for rate limits |
//!
//! A call may be allowed by the [`concurrency`](crate::concurrency) manager and still have
//! to wait here: concurrency bounds simultaneous jobs, the rate limiter bounds request
//! throughput per provider.
//!
//! ```rust
//! use ai_job_pipeline::resilience::rate_limiter::{RateLimiter, RateQuota};
//! use std::time::Duration;
//!
//! # async fn demo() -> ai_job_pipeline::Result<()> {
//! let limiter = RateLimiter::in_memory();
//! let quota = RateQuota::per_minute(60).with_daily_limit(10_000);
//! limiter.check_and_wait("openai", &quota, Duration::from_secs(30)).await?;
//! // ... call the provider ...
//! # Ok(())
//! # }
//! ```

pub mod rate_limiter;
pub mod retry;
pub mod window_store;

pub use rate_limiter::{RateLimiter, RateLimiterSnapshot, RateQuota};
pub use retry::{Decision, RetryPolicy};
pub use window_store::{Admission, InMemoryRateWindowStore, RateWindowStatus, RateWindowStore};
