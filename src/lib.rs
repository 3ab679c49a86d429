//! # ai-job-pipeline
//!
//! 面向多服务商大模型调用的后台任务流水线：任务状态机、两级并发控制、滑动窗口限流与批处理运行器。
//!
//! Background job pipeline for long-form text work (chapter translation, analysis, and
//! chapter extraction) driven by interchangeable LLM providers.
//!
//! ## Overview
//!
//! The text processing is the easy part. The hard part is scheduling many concurrent,
//! expensive, fallible and rate-limited provider calls across workers without
//! double-processing a job, exceeding a provider quota, or losing track of a failure.
//!
//! - **Atomic claims**: a job moves `pending → processing` only through a compare-and-swap
//! - **Two-tier concurrency**: a global cap plus a per-job-type cap, with leased slots
//! - **Sliding-window rate limiting**: per-provider requests per minute and per day
//! - **Provider-agnostic errors**: every backend failure is classified into one taxonomy
//! - **Tolerant parsing**: near-JSON model output is recovered and checked field by field
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ai_job_pipeline::concurrency::InMemorySlotStore;
//! use ai_job_pipeline::jobs::{InMemoryJobStore, JobType, NewJob, JobStore};
//! use ai_job_pipeline::provider::ProviderRegistry;
//! use ai_job_pipeline::resilience::RateLimiter;
//! use ai_job_pipeline::runner::BatchLimit;
//! use ai_job_pipeline::tasks::{Handlers, InMemoryContentStore, InMemoryEntityStore};
//! use ai_job_pipeline::PipelineConfig;
//!
//! #[tokio::main]
//! async fn main() -> ai_job_pipeline::Result<()> {
//!     let config = PipelineConfig::from_yaml_file("pipeline.yaml")?;
//!     let jobs = Arc::new(InMemoryJobStore::new());
//!     let content = Arc::new(InMemoryContentStore::new());
//!     content.add_chapter("ch-1", "It was a bright cold day in April.")?;
//!     jobs.insert(NewJob::translation("ch-1", "de")).await?;
//!
//!     let runner = config.build_runner(
//!         &ProviderRegistry::with_defaults(),
//!         jobs.clone(),
//!         Arc::new(config.concurrency_manager(Arc::new(InMemorySlotStore::new()))),
//!         Arc::new(RateLimiter::in_memory()),
//!         Handlers::standard(content, Arc::new(InMemoryEntityStore::new())),
//!     )?;
//!     let report = runner.run_batch(JobType::Translation, BatchLimit::UntilEmpty).await?;
//!     println!("{} completed, {} failed", report.completed, report.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`jobs`] | Job records, state machine and the job store contract |
//! | [`concurrency`] | Global and per-type slot accounting with leases |
//! | [`resilience`] | Sliding-window rate limiter and call-level retry policy |
//! | [`provider`] | Provider trait, registry, failure classification, OpenAI/Anthropic drivers |
//! | [`structured`] | Tolerant JSON extraction and task output validation |
//! | [`tasks`] | Per-job-type handlers and their content/entity stores |
//! | [`runner`] | Batch runner and polling worker |
//! | [`config`] | YAML configuration |
//! | [`types`] | Chat messages and completion responses |

pub mod concurrency;
pub mod config;
pub mod jobs;
pub mod provider;
pub mod resilience;
pub mod runner;
pub mod structured;
pub mod tasks;
pub mod types;

pub use config::PipelineConfig;
pub use jobs::{Job, JobStatus, JobType};
pub use provider::{ChatProvider, CompletionRequest};
pub use types::{ChatCompletionResponse, ChatMessage, MessageRole};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, JobDisposition};
