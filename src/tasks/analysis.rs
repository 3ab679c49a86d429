use async_trait::async_trait;
use std::sync::Arc;

use super::{ContentStore, JobHandler, TaskResult};
use crate::jobs::{Job, JobPayload, JobType};
use crate::provider::CompletionRequest;
use crate::structured::{parse_task_output, AnalysisOutput};
use crate::types::{ChatCompletionResponse, ChatMessage, ResponseFormat};
use crate::{Error, Result};

const TEMPERATURE: f64 = 0.2;

/// Extracts characters, places, terms and a summary from one chapter.
pub struct AnalysisHandler {
    content: Arc<dyn ContentStore>,
}

impl AnalysisHandler {
    pub fn new(content: Arc<dyn ContentStore>) -> Self {
        Self { content }
    }

    fn chapter_id(job: &Job) -> Result<&str> {
        match &job.payload {
            JobPayload::Analysis { chapter_id } => Ok(chapter_id.as_str()),
            other => Err(Error::validation(format!(
                "job {} has a {} payload, expected analysis",
                job.id,
                other.job_type()
            ))),
        }
    }
}

#[async_trait]
impl JobHandler for AnalysisHandler {
    fn job_type(&self) -> JobType {
        JobType::Analysis
    }

    async fn prepare(&self, job: &Job) -> Result<CompletionRequest> {
        let text = self.content.chapter_text(Self::chapter_id(job)?).await?;
        Ok(CompletionRequest::new(vec![
            ChatMessage::system(
                "List the characters, places and special terms in the chapter and summarize it. \
                 Reply with a JSON object with list keys \"characters\", \"places\", \"terms\" \
                 (each item {\"name\", \"description\"}) and a string \"summary\".",
            ),
            ChatMessage::user(text),
        ])
        .with_temperature(TEMPERATURE)
        .with_response_format(ResponseFormat::Json))
    }

    fn parse(&self, job: &Job, response: &ChatCompletionResponse) -> Result<TaskResult> {
        Self::chapter_id(job)?;
        let output: AnalysisOutput = parse_task_output(&response.content)?;
        Ok(TaskResult::Analysis(output))
    }

    async fn persist(&self, job: &Job, result: TaskResult) -> Result<()> {
        match result {
            TaskResult::Analysis(output) => {
                self.content
                    .save_analysis(Self::chapter_id(job)?, &output)
                    .await
            }
            other => Err(other.mismatch(job)),
        }
    }
}
