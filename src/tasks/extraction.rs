use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{ContentStore, JobHandler, TaskResult};
use crate::jobs::{Job, JobPayload, JobType};
use crate::provider::CompletionRequest;
use crate::structured::{parse_task_output, ExtractionOutput};
use crate::types::{ChatCompletionResponse, ChatMessage, ResponseFormat};
use crate::{Error, Result};

/// Splits an uploaded document into chapters.
pub struct ExtractionHandler {
    content: Arc<dyn ContentStore>,
}

impl ExtractionHandler {
    pub fn new(content: Arc<dyn ContentStore>) -> Self {
        Self { content }
    }

    fn upload_id(job: &Job) -> Result<&str> {
        match &job.payload {
            JobPayload::Extraction { upload_id } => Ok(upload_id.as_str()),
            other => Err(Error::validation(format!(
                "job {} has a {} payload, expected extraction",
                job.id,
                other.job_type()
            ))),
        }
    }
}

#[async_trait]
impl JobHandler for ExtractionHandler {
    fn job_type(&self) -> JobType {
        JobType::Extraction
    }

    async fn prepare(&self, job: &Job) -> Result<CompletionRequest> {
        let text = self.content.upload_text(Self::upload_id(job)?).await?;
        Ok(CompletionRequest::new(vec![
            ChatMessage::system(
                "Split the document into chapters in reading order. Reply with a JSON object \
                 {\"chapters\": [{\"title\", \"content\"}]} keeping the original text.",
            ),
            ChatMessage::user(text),
        ])
        .with_temperature(0.0)
        .with_response_format(ResponseFormat::Json))
    }

    fn parse(&self, job: &Job, response: &ChatCompletionResponse) -> Result<TaskResult> {
        Self::upload_id(job)?;
        let output: ExtractionOutput = parse_task_output(&response.content)?;
        Ok(TaskResult::Extraction(output))
    }

    async fn persist(&self, job: &Job, result: TaskResult) -> Result<()> {
        let upload_id = Self::upload_id(job)?;
        let output = match result {
            TaskResult::Extraction(output) => output,
            other => return Err(other.mismatch(job)),
        };
        self.content
            .save_chapters(upload_id, &output.chapters)
            .await?;
        debug!(
            job_id = %job.id,
            upload_id,
            chapters = output.chapters.len(),
            "extracted chapters saved"
        );
        Ok(())
    }
}
