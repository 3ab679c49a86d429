//! Typed task outputs and their field checks.
//!
//! Required keys are checked on the raw JSON first so a missing or mistyped field is
//! reported by path; optional fields (entity mappings, notes) fall back to empty values.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use super::parser::{extract_json, preview};
use crate::{Error, ErrorContext, Result};

/// One failed field check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// JSON path of the offending field (e.g. `content`, `chapters[2].title`)
    pub path: String,
    pub message: String,
}

impl FieldError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A structured result a model is asked to produce for one job type.
pub trait TaskOutput: Serialize + for<'de> Deserialize<'de> {
    /// Short name used in error messages.
    const KIND: &'static str;

    /// Check required keys on the parsed object.
    fn check(object: &Map<String, Value>) -> Vec<FieldError>;
}

/// Extract, check and deserialize a task output from raw model text.
pub fn parse_task_output<T: TaskOutput>(text: &str) -> Result<T> {
    let value = extract_json(text)?;
    let Value::Object(object) = &value else {
        return Err(Error::ResponseParsing {
            message: format!("{} output must be a JSON object", T::KIND),
            preview: preview(text),
        });
    };

    let errors = T::check(object);
    if let Some(first) = errors.first() {
        let all: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(Error::validation_with_context(
            format!("{} output is missing required fields", T::KIND),
            ErrorContext::new()
                .with_field_path(first.path.clone())
                .with_details(all.join("; "))
                .with_source("response_validator"),
        ));
    }

    serde_json::from_value(value).map_err(|e| Error::ResponseParsing {
        message: format!("{} output has an unexpected shape: {}", T::KIND, e),
        preview: preview(text),
    })
}

fn require_string(
    object: &Map<String, Value>,
    key: &str,
    non_empty: bool,
    errors: &mut Vec<FieldError>,
) {
    match object.get(key) {
        Some(Value::String(s)) if non_empty && s.trim().is_empty() => {
            errors.push(FieldError::new(key, "must not be empty"))
        }
        Some(Value::String(_)) => {}
        Some(_) => errors.push(FieldError::new(key, "must be a string")),
        None => errors.push(FieldError::new(key, "is required")),
    }
}

fn require_list(object: &Map<String, Value>, key: &str, errors: &mut Vec<FieldError>) {
    match object.get(key) {
        Some(Value::Array(_)) => {}
        Some(_) => errors.push(FieldError::new(key, "must be a list")),
        None => errors.push(FieldError::new(key, "is required")),
    }
}

/// `null` deserializes to the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationOutput {
    pub title: String,
    pub content: String,
    /// Source-language proper noun → translation.
    #[serde(default, deserialize_with = "null_as_default")]
    pub entities: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub notes: String,
}

impl TaskOutput for TranslationOutput {
    const KIND: &'static str = "translation";

    fn check(object: &Map<String, Value>) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require_string(object, "title", false, &mut errors);
        require_string(object, "content", true, &mut errors);
        errors
    }
}

/// A character, place or term from chapter analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawEntry")]
pub struct AnalysisEntry {
    pub name: String,
    pub description: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Name(String),
    Full {
        name: String,
        #[serde(default, deserialize_with = "null_as_default")]
        description: String,
    },
}

impl From<RawEntry> for AnalysisEntry {
    fn from(raw: RawEntry) -> Self {
        match raw {
            RawEntry::Name(name) => Self {
                name,
                description: String::new(),
            },
            RawEntry::Full { name, description } => Self { name, description },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub characters: Vec<AnalysisEntry>,
    pub places: Vec<AnalysisEntry>,
    pub terms: Vec<AnalysisEntry>,
    pub summary: String,
}

impl TaskOutput for AnalysisOutput {
    const KIND: &'static str = "analysis";

    fn check(object: &Map<String, Value>) -> Vec<FieldError> {
        let mut errors = Vec::new();
        for key in ["characters", "places", "terms"] {
            require_list(object, key, &mut errors);
        }
        require_string(object, "summary", false, &mut errors);
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedChapter {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub chapters: Vec<ExtractedChapter>,
}

impl TaskOutput for ExtractionOutput {
    const KIND: &'static str = "extraction";

    fn check(object: &Map<String, Value>) -> Vec<FieldError> {
        let mut errors = Vec::new();
        match object.get("chapters") {
            Some(Value::Array(chapters)) if chapters.is_empty() => {
                errors.push(FieldError::new("chapters", "must not be empty"))
            }
            Some(Value::Array(chapters)) => {
                for (i, chapter) in chapters.iter().enumerate() {
                    match chapter {
                        Value::Object(c) => {
                            let mut inner = Vec::new();
                            require_string(c, "title", false, &mut inner);
                            require_string(c, "content", true, &mut inner);
                            errors.extend(inner.into_iter().map(|e| {
                                FieldError::new(format!("chapters[{}].{}", i, e.path), e.message)
                            }));
                        }
                        _ => errors.push(FieldError::new(
                            format!("chapters[{}]", i),
                            "must be an object",
                        )),
                    }
                }
            }
            Some(_) => errors.push(FieldError::new("chapters", "must be a list")),
            None => errors.push(FieldError::new("chapters", "is required")),
        }
        errors
    }
}
