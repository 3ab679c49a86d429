use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

use super::{ContentStore, EntityStore, JobHandler, TaskResult};
use crate::jobs::{Job, JobPayload, JobType};
use crate::provider::CompletionRequest;
use crate::structured::{parse_task_output, TranslationOutput};
use crate::types::{ChatCompletionResponse, ChatMessage, ResponseFormat};
use crate::{Error, Result};

const TEMPERATURE: f64 = 0.3;

/// Translates one chapter into the job's target language.
///
/// Known entity translations are handed to the model as a glossary; entities the model
/// introduces are written back only when no translation exists yet.
pub struct TranslationHandler {
    content: Arc<dyn ContentStore>,
    entities: Arc<dyn EntityStore>,
}

impl TranslationHandler {
    pub fn new(content: Arc<dyn ContentStore>, entities: Arc<dyn EntityStore>) -> Self {
        Self { content, entities }
    }

    fn payload(job: &Job) -> Result<(&str, &str)> {
        match &job.payload {
            JobPayload::Translation {
                chapter_id,
                target_language,
            } => Ok((chapter_id.as_str(), target_language.as_str())),
            other => Err(Error::validation(format!(
                "job {} has a {} payload, expected translation",
                job.id,
                other.job_type()
            ))),
        }
    }
}

#[async_trait]
impl JobHandler for TranslationHandler {
    fn job_type(&self) -> JobType {
        JobType::Translation
    }

    async fn prepare(&self, job: &Job) -> Result<CompletionRequest> {
        let (chapter_id, language) = Self::payload(job)?;
        let text = self.content.chapter_text(chapter_id).await?;
        let glossary = self.entities.translations(language).await?;

        let mut system = format!(
            "Translate the chapter into {}. Reply with a JSON object with keys \
             \"title\", \"content\", \"entities\" (proper noun -> translation) and \"notes\".",
            language
        );
        if !glossary.is_empty() {
            system.push_str("\nUse these established translations:");
            for (name, translated) in &glossary {
                let _ = write!(system, "\n- {} = {}", name, translated);
            }
        }

        Ok(CompletionRequest::new(vec![
            ChatMessage::system(system),
            ChatMessage::user(text),
        ])
        .with_temperature(TEMPERATURE)
        .with_response_format(ResponseFormat::Json))
    }

    fn parse(&self, job: &Job, response: &ChatCompletionResponse) -> Result<TaskResult> {
        Self::payload(job)?;
        let output: TranslationOutput = parse_task_output(&response.content)?;
        Ok(TaskResult::Translation(output))
    }

    async fn persist(&self, job: &Job, result: TaskResult) -> Result<()> {
        let (chapter_id, language) = Self::payload(job)?;
        let output = match result {
            TaskResult::Translation(output) => output,
            other => return Err(other.mismatch(job)),
        };

        let mut added = 0usize;
        for (name, translated) in &output.entities {
            if name.trim().is_empty() || translated.trim().is_empty() {
                continue;
            }
            if self.entities.get_translation(name, language).await?.is_none() {
                self.entities.set_translation(name, language, translated).await?;
                added += 1;
            }
        }

        self.content
            .save_translation(chapter_id, language, &output)
            .await?;
        debug!(
            job_id = %job.id,
            chapter_id,
            language,
            new_entities = added,
            "translation saved"
        );
        Ok(())
    }
}
