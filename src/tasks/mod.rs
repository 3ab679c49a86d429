//! Job handlers: what each job type asks the model and what it does with the answer.
//!
//! A handler wraps the provider call: [`JobHandler::prepare`] builds the request from
//! stored content, [`JobHandler::parse`] turns the answer into a validated
//! [`TaskResult`] without side effects, and [`JobHandler::persist`] writes it. The batch
//! runner owns everything in between (slots, rate limiting, retries, job status) and
//! only persists results for jobs that are still `processing`.

mod analysis;
mod extraction;
mod stores;
mod translation;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::jobs::{Job, JobType};
use crate::provider::CompletionRequest;
use crate::structured::{AnalysisOutput, ExtractionOutput, TranslationOutput};
use crate::types::ChatCompletionResponse;
use crate::{Error, Result};

pub use analysis::AnalysisHandler;
pub use extraction::ExtractionHandler;
pub use stores::{ContentStore, EntityStore, InMemoryContentStore, InMemoryEntityStore};
pub use translation::TranslationHandler;

/// A parsed and validated model answer, not yet written anywhere.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResult {
    Translation(TranslationOutput),
    Analysis(AnalysisOutput),
    Extraction(ExtractionOutput),
}

impl TaskResult {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::Translation(_) => JobType::Translation,
            Self::Analysis(_) => JobType::Analysis,
            Self::Extraction(_) => JobType::Extraction,
        }
    }

    pub(crate) fn mismatch(&self, job: &Job) -> Error {
        Error::validation(format!(
            "job {} expects a {} result, got {}",
            job.id,
            job.job_type,
            self.job_type()
        ))
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    /// Build the provider request for `job`.
    async fn prepare(&self, job: &Job) -> Result<CompletionRequest>;

    /// Parse and validate the model's answer. Writes nothing.
    fn parse(&self, job: &Job, response: &ChatCompletionResponse) -> Result<TaskResult>;

    /// Write a result produced by [`parse`](Self::parse).
    async fn persist(&self, job: &Job, result: TaskResult) -> Result<()>;
}

/// Handler lookup by job type.
#[derive(Clone, Default)]
pub struct Handlers {
    by_type: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The translation, analysis and extraction handlers over shared stores.
    pub fn standard(content: Arc<dyn ContentStore>, entities: Arc<dyn EntityStore>) -> Self {
        Self::new()
            .with(Arc::new(TranslationHandler::new(content.clone(), entities)))
            .with(Arc::new(AnalysisHandler::new(content.clone())))
            .with(Arc::new(ExtractionHandler::new(content)))
    }

    /// Add or replace the handler for its job type.
    pub fn with(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.by_type.insert(handler.job_type(), handler);
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.by_type.get(&job_type).cloned()
    }

    pub fn job_types(&self) -> Vec<JobType> {
        JobType::ALL
            .into_iter()
            .filter(|t| self.by_type.contains_key(t))
            .collect()
    }
}
