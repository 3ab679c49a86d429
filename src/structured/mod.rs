//! Response parsing and validation.
//!
//! - [`extract_json`]: recover the JSON object from near-JSON model output
//! - [`parse_task_output`]: extract, check required fields and deserialize a [`TaskOutput`]
//! - [`preview`]: bounded excerpt of prompt or response text for diagnostics
//!
//! # Examples
//!
//! ```
//! use ai_job_pipeline::structured::{parse_task_output, TranslationOutput};
//!
//! let raw = "```json\n{\"title\":\"A\",\"content\":\"B\"}\n```";
//! let out: TranslationOutput = parse_task_output(raw).unwrap();
//!
//! assert_eq!(out.title, "A");
//! assert_eq!(out.content, "B");
//! assert!(out.entities.is_empty());
//! ```

pub mod output;
pub mod parser;

pub use output::{
    parse_task_output, AnalysisEntry, AnalysisOutput, ExtractedChapter, ExtractionOutput,
    FieldError, TaskOutput, TranslationOutput,
};
pub use parser::{extract_json, preview, strip_code_fences, PREVIEW_LIMIT};
