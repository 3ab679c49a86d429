use crate::provider::FailureCategory;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for validation and configuration failures.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "concurrency.global_limit", "messages[0].content")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Component that raised the error (e.g., "config", "response_validator")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the job pipeline.
///
/// Every failure that can reach the batch runner is one of these variants; the runner
/// uses [`Error::job_disposition`] to decide whether the job is deferred or failed.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input. Never retried.
    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    /// Missing credentials or settings.
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Provider '{name}' is not registered (known providers: {})", .known.join(", "))]
    ProviderNotFound { name: String, known: Vec<String> },

    /// Quota exceeded, either locally (sliding window) or reported by the provider.
    #[error("Rate limit exceeded for '{provider}': {message}{}", format_retry_after(.retry_after))]
    RateLimit {
        provider: String,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Transport or provider failure after call-level retries were exhausted.
    #[error("API error from '{provider}' ({category}{}): {message}", format_status(.status))]
    Api {
        provider: String,
        category: FailureCategory,
        status: Option<u16>,
        message: String,
    },

    #[error("Response parsing error: {message} (response preview: {preview:?})")]
    ResponseParsing { message: String, preview: String },

    /// No concurrency slot was available at acquisition time.
    #[error("No concurrency capacity available for {job_type} jobs")]
    Capacity { job_type: String },

    /// Failure reported by an external collaborator (job store, content store, slot store).
    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {:.1}s)", d.as_secs_f64()),
        None => String::new(),
    }
}

fn format_status(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(", HTTP {}", s),
        None => String::new(),
    }
}

/// What the batch runner does with a job whose execution ended in an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    /// Return the job to `pending` and halt the batch.
    Defer,
    /// Mark the job `failed` and continue with the next one.
    Fail,
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn rate_limit(
        provider: impl Into<String>,
        msg: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        Error::RateLimit {
            provider: provider.into(),
            message: msg.into(),
            retry_after,
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Validation { context, .. } | Error::Configuration { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Error::RateLimit { .. })
    }

    /// Whether a call-level retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimit { .. } => true,
            Error::Api { category, .. } => category.retryable(),
            _ => false,
        }
    }

    /// Provider-requested or locally computed wait, for rate-limit errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn job_disposition(&self) -> JobDisposition {
        if self.is_rate_limit() {
            JobDisposition::Defer
        } else {
            JobDisposition::Fail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_rendered_in_display() {
        let err = Error::configuration_with_context(
            "limit must be positive",
            ErrorContext::new()
                .with_field_path("concurrency.global_limit")
                .with_source("config"),
        );
        let msg = err.to_string();
        assert!(msg.contains("limit must be positive"));
        assert!(msg.contains("field: concurrency.global_limit"));
        assert!(msg.contains("source: config"));
    }

    #[test]
    fn test_provider_not_found_lists_known() {
        let err = Error::ProviderNotFound {
            name: "mistral".into(),
            known: vec!["anthropic".into(), "openai".into()],
        };
        assert_eq!(
            err.to_string(),
            "Provider 'mistral' is not registered (known providers: anthropic, openai)"
        );
    }

    #[test]
    fn test_dispositions() {
        let rl = Error::rate_limit("openai", "minute window full", Some(Duration::from_secs(30)));
        assert_eq!(rl.job_disposition(), JobDisposition::Defer);
        assert!(rl.to_string().contains("retry after 30.0s"));

        let parse = Error::ResponseParsing {
            message: "expected value".into(),
            preview: "not json".into(),
        };
        assert_eq!(parse.job_disposition(), JobDisposition::Fail);
        assert_eq!(Error::validation("x").job_disposition(), JobDisposition::Fail);
    }

    #[test]
    fn test_retryable_follows_category() {
        let transient = Error::Api {
            provider: "openai".into(),
            category: FailureCategory::ServerError,
            status: Some(500),
            message: "boom".into(),
        };
        assert!(transient.is_retryable());
        assert!(transient.to_string().contains("HTTP 500"));

        let bad_request = Error::Api {
            provider: "openai".into(),
            category: FailureCategory::InvalidRequest,
            status: Some(400),
            message: "bad".into(),
        };
        assert!(!bad_request.is_retryable());
    }
}
