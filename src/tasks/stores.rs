//! Collaborators the task handlers read from and write to.
//!
//! Both are owned by the persistence layer in a deployment; the in-memory versions back
//! tests and single-process runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::structured::{AnalysisOutput, ExtractedChapter, TranslationOutput};
use crate::{Error, Result};

/// Source text and task results.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn chapter_text(&self, chapter_id: &str) -> Result<String>;

    /// Raw text of an uploaded document awaiting chapter extraction.
    async fn upload_text(&self, upload_id: &str) -> Result<String>;

    async fn save_translation(
        &self,
        chapter_id: &str,
        language: &str,
        output: &TranslationOutput,
    ) -> Result<()>;

    async fn save_analysis(&self, chapter_id: &str, output: &AnalysisOutput) -> Result<()>;

    async fn save_chapters(&self, upload_id: &str, chapters: &[ExtractedChapter]) -> Result<()>;
}

/// Named-entity translations kept consistent across chapters.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_translation(&self, entity: &str, language: &str) -> Result<Option<String>>;

    async fn set_translation(&self, entity: &str, language: &str, value: &str) -> Result<()>;

    /// Every known entity → translation pair for `language`.
    async fn translations(&self, language: &str) -> Result<BTreeMap<String, String>>;
}

#[derive(Debug, Default)]
struct Content {
    chapters: HashMap<String, String>,
    uploads: HashMap<String, String>,
    translations: HashMap<(String, String), TranslationOutput>,
    analyses: HashMap<String, AnalysisOutput>,
    extracted: HashMap<String, Vec<ExtractedChapter>>,
}

#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    inner: Mutex<Content>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Content>> {
        self.inner
            .lock()
            .map_err(|_| Error::store("content store mutex poisoned"))
    }

    pub fn add_chapter(&self, chapter_id: &str, text: &str) -> Result<()> {
        self.lock()?
            .chapters
            .insert(chapter_id.to_string(), text.to_string());
        Ok(())
    }

    pub fn add_upload(&self, upload_id: &str, text: &str) -> Result<()> {
        self.lock()?
            .uploads
            .insert(upload_id.to_string(), text.to_string());
        Ok(())
    }

    pub fn translation(&self, chapter_id: &str, language: &str) -> Result<Option<TranslationOutput>> {
        Ok(self
            .lock()?
            .translations
            .get(&(chapter_id.to_string(), language.to_string()))
            .cloned())
    }

    pub fn analysis(&self, chapter_id: &str) -> Result<Option<AnalysisOutput>> {
        Ok(self.lock()?.analyses.get(chapter_id).cloned())
    }

    pub fn extracted_chapters(&self, upload_id: &str) -> Result<Vec<ExtractedChapter>> {
        Ok(self
            .lock()?
            .extracted
            .get(upload_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn chapter_text(&self, chapter_id: &str) -> Result<String> {
        self.lock()?
            .chapters
            .get(chapter_id)
            .cloned()
            .ok_or_else(|| Error::store(format!("chapter {} not found", chapter_id)))
    }

    async fn upload_text(&self, upload_id: &str) -> Result<String> {
        self.lock()?
            .uploads
            .get(upload_id)
            .cloned()
            .ok_or_else(|| Error::store(format!("upload {} not found", upload_id)))
    }

    async fn save_translation(
        &self,
        chapter_id: &str,
        language: &str,
        output: &TranslationOutput,
    ) -> Result<()> {
        self.lock()?.translations.insert(
            (chapter_id.to_string(), language.to_string()),
            output.clone(),
        );
        Ok(())
    }

    async fn save_analysis(&self, chapter_id: &str, output: &AnalysisOutput) -> Result<()> {
        self.lock()?
            .analyses
            .insert(chapter_id.to_string(), output.clone());
        Ok(())
    }

    async fn save_chapters(&self, upload_id: &str, chapters: &[ExtractedChapter]) -> Result<()> {
        self.lock()?
            .extracted
            .insert(upload_id.to_string(), chapters.to_vec());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    // language → entity → translation
    inner: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, BTreeMap<String, String>>>> {
        self.inner
            .lock()
            .map_err(|_| Error::store("entity store mutex poisoned"))
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get_translation(&self, entity: &str, language: &str) -> Result<Option<String>> {
        Ok(self
            .lock()?
            .get(language)
            .and_then(|m| m.get(entity))
            .cloned())
    }

    async fn set_translation(&self, entity: &str, language: &str, value: &str) -> Result<()> {
        self.lock()?
            .entry(language.to_string())
            .or_default()
            .insert(entity.to_string(), value.to_string());
        Ok(())
    }

    async fn translations(&self, language: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.lock()?.get(language).cloned().unwrap_or_default())
    }
}
