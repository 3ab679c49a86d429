//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ai_job_pipeline::concurrency::{ConcurrencyLimits, ConcurrencyManager};
use ai_job_pipeline::jobs::InMemoryJobStore;
use ai_job_pipeline::provider::{ChatProvider, CompletionRequest};
use ai_job_pipeline::resilience::{RateLimiter, RetryPolicy};
use ai_job_pipeline::runner::BatchRunner;
use ai_job_pipeline::tasks::{Handlers, InMemoryContentStore, InMemoryEntityStore};
use ai_job_pipeline::types::Usage;
use ai_job_pipeline::{ChatCompletionResponse, Error, Result};

pub const TRANSLATION_REPLY: &str = r#"{"title":"Kapitel 1","content":"Es war ein heller, kalter Tag im April.","entities":{"Winston":"Winston"},"notes":""}"#;

/// Provider that replays queued outcomes, then repeats a fallback reply.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String>>>,
    fallback: String,
    latency: Duration,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn replying(fallback: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.to_string(),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then_reply(self, content: &str) -> Self {
        self.script.lock().unwrap().push_back(Ok(content.to_string()));
        self
    }

    pub fn then_fail(self, err: Error) -> Self {
        self.script.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<ChatCompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        let content = match next {
            Some(step) => step?,
            None => self.fallback.clone(),
        };
        Ok(ChatCompletionResponse {
            content,
            model: "scripted-1".into(),
            provider: "scripted".into(),
            finish_reason: Some("stop".into()),
            usage: Usage::new(10, 5),
        })
    }
}

/// Everything a batch test needs to inspect after a run.
pub struct Fixture {
    pub jobs: Arc<InMemoryJobStore>,
    pub content: Arc<InMemoryContentStore>,
    pub entities: Arc<InMemoryEntityStore>,
    pub concurrency: Arc<ConcurrencyManager>,
    pub limiter: Arc<RateLimiter>,
}

impl Fixture {
    pub fn new(limits: ConcurrencyLimits) -> Self {
        Self {
            jobs: Arc::new(InMemoryJobStore::new()),
            content: Arc::new(InMemoryContentStore::new()),
            entities: Arc::new(InMemoryEntityStore::new()),
            concurrency: Arc::new(ConcurrencyManager::in_memory(limits)),
            limiter: Arc::new(RateLimiter::in_memory()),
        }
    }

    pub fn handlers(&self) -> Handlers {
        Handlers::standard(self.content.clone(), self.entities.clone())
    }

    /// Runner without call-level retries so every scripted failure reaches the job.
    pub fn runner(&self, provider: Arc<dyn ChatProvider>) -> BatchRunner {
        BatchRunner::new(
            self.jobs.clone(),
            self.concurrency.clone(),
            self.limiter.clone(),
            provider,
            self.handlers(),
        )
        .with_retry_policy(RetryPolicy::none())
    }
}
