//! Tolerant JSON extraction from model output.
//!
//! Models asked for JSON still wrap it in code fences or surround it with prose. The
//! parser strips fence markers, slices from the first `{` to the last `}` and parses
//! that. Anything it cannot recover becomes [`Error::ResponseParsing`] carrying a
//! bounded preview of the offending text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::{Error, Result};

/// Upper bound, in characters, for any model or prompt text kept for diagnostics.
pub const PREVIEW_LIMIT: usize = 500;

static LEADING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*```[A-Za-z0-9_-]*[ \t]*\r?\n?").expect("valid regex"));
static TRAILING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n?[ \t]*```\s*$").expect("valid regex"));

/// Truncate `text` to [`PREVIEW_LIMIT`] characters, marking the cut with `...`.
pub fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Remove a leading ```` ```lang ```` line and a trailing ```` ``` ````, if present.
pub fn strip_code_fences(text: &str) -> &str {
    let start = LEADING_FENCE.find(text).map(|m| m.end()).unwrap_or(0);
    let rest = &text[start..];
    let end = TRAILING_FENCE
        .find(rest)
        .map(|m| m.start())
        .unwrap_or(rest.len());
    rest[..end].trim()
}

/// Extract the JSON object embedded in `text`.
pub fn extract_json(text: &str) -> Result<Value> {
    let body = strip_code_fences(text);
    let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) else {
        return Err(Error::ResponseParsing {
            message: "no JSON object found in model output".to_string(),
            preview: preview(text),
        });
    };
    if end < start {
        return Err(Error::ResponseParsing {
            message: "no JSON object found in model output".to_string(),
            preview: preview(text),
        });
    }

    serde_json::from_str(&body[start..=end]).map_err(|e| Error::ResponseParsing {
        message: format!("model output is not valid JSON: {}", e),
        preview: preview(text),
    })
}
