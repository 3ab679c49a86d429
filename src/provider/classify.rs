//! Provider failure classification.
//!
//! Maps whatever a provider transport reports (structured error code, HTTP status, and as a
//! last resort the error text) onto one shared [`FailureCategory`], then onto the crate
//! [`Error`] taxonomy so retry logic upstream stays provider-agnostic.
//!
//! Resolution order:
//! 1. provider error code/type from the JSON error body (`error.code`, `error.type`)
//! 2. HTTP status
//! 3. keyword match on the lower-cased message

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Malformed request, invalid parameters, or missing required fields
    InvalidRequest,
    /// Invalid, expired, or missing API key
    Authentication,
    PermissionDenied,
    /// Model or endpoint does not exist
    NotFound,
    /// Input exceeds the context window or payload limit
    RequestTooLarge,
    RateLimited,
    /// Account quota or billing limit reached
    QuotaExhausted,
    ServerError,
    Overloaded,
    Timeout,
    /// Connection-level failure before any HTTP status was received
    Network,
    Unknown,
}

impl FailureCategory {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Authentication => "authentication",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::RequestTooLarge => "request_too_large",
            Self::RateLimited => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ServerError => "server_error",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Unknown => "unknown",
        }
    }

    /// Transient failures that a flat-delay retry may clear.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::ServerError | Self::Overloaded | Self::Timeout | Self::Network
        )
    }

    /// Quota-style failures that must halt the batch rather than fail the job.
    #[inline]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited | Self::QuotaExhausted)
    }

    pub fn from_provider_code(provider_code: &str) -> Option<Self> {
        let code = match provider_code {
            "invalid_request" | "invalid_request_error" => Self::InvalidRequest,
            "authentication" | "authentication_error" | "invalid_api_key" | "unauthorized" => {
                Self::Authentication
            }
            "permission_denied" | "permission_error" => Self::PermissionDenied,
            "not_found" | "not_found_error" | "model_not_found" => Self::NotFound,
            "request_too_large" | "context_length_exceeded" => Self::RequestTooLarge,
            "rate_limited" | "rate_limit_exceeded" | "rate_limit_error" => Self::RateLimited,
            "quota_exhausted" | "insufficient_quota" => Self::QuotaExhausted,
            "server_error" | "api_error" | "internal_error" => Self::ServerError,
            "overloaded" | "overloaded_error" => Self::Overloaded,
            "timeout" => Self::Timeout,
            _ => return None,
        };
        Some(code)
    }

    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::InvalidRequest,
            401 => Self::Authentication,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            408 => Self::Timeout,
            413 => Self::RequestTooLarge,
            429 => Self::RateLimited,
            500 | 502 => Self::ServerError,
            503 | 529 => Self::Overloaded,
            504 => Self::Timeout,
            s if (500..=599).contains(&s) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Keyword fallback for transports that expose nothing structured.
    pub fn from_message(message: &str) -> Self {
        let m = message.to_lowercase();
        if m.contains("quota") || m.contains("billing") {
            Self::QuotaExhausted
        } else if m.contains("rate limit") || m.contains("rate_limit") || m.contains("too many requests") {
            Self::RateLimited
        } else if m.contains("auth") || m.contains("api key") || m.contains("api_key") {
            Self::Authentication
        } else if m.contains("overloaded") {
            Self::Overloaded
        } else if m.contains("timed out") || m.contains("timeout") {
            Self::Timeout
        } else {
            Self::Unknown
        }
    }

    pub fn classify(provider_code: Option<&str>, status: Option<u16>, message: &str) -> Self {
        if let Some(cat) = provider_code.and_then(Self::from_provider_code) {
            return cat;
        }
        if let Some(status) = status {
            let cat = Self::from_http_status(status);
            if cat != Self::Unknown {
                return cat;
            }
        }
        Self::from_message(message)
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw facts about one failed provider call.
#[derive(Debug, Clone, Default)]
pub struct ProviderFailure {
    pub status: Option<u16>,
    pub provider_code: Option<String>,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl ProviderFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn category(&self) -> FailureCategory {
        FailureCategory::classify(self.provider_code.as_deref(), self.status, &self.message)
    }

    /// Reclassify into the shared error taxonomy.
    pub fn into_error(self, provider: &str) -> Error {
        let category = self.category();
        match category {
            c if c.is_rate_limit() => Error::RateLimit {
                provider: provider.to_string(),
                message: format!("{}: {}", c, self.message),
                retry_after: self.retry_after,
            },
            FailureCategory::Authentication => Error::configuration_with_context(
                format!("provider rejected credentials: {}", self.message),
                crate::ErrorContext::new()
                    .with_field_path(format!("providers.{}.api_key", provider))
                    .with_source("provider_transport"),
            ),
            _ => Error::Api {
                provider: provider.to_string(),
                category,
                status: self.status,
                message: self.message,
            },
        }
    }
}

/// Pull `error.code` / `error.type` out of an OpenAI- or Anthropic-style error body.
pub fn provider_code_from_body(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = json.get("error")?;
    error
        .get("code")
        .and_then(|v| v.as_str())
        .or_else(|| error.get("type").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_code_takes_precedence_over_status() {
        // OpenAI reports exhausted quota as a 429
        let cat = FailureCategory::classify(Some("insufficient_quota"), Some(429), "");
        assert_eq!(cat, FailureCategory::QuotaExhausted);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(FailureCategory::from_http_status(429), FailureCategory::RateLimited);
        assert_eq!(FailureCategory::from_http_status(401), FailureCategory::Authentication);
        assert_eq!(FailureCategory::from_http_status(529), FailureCategory::Overloaded);
        assert_eq!(FailureCategory::from_http_status(507), FailureCategory::ServerError);
        assert_eq!(FailureCategory::from_http_status(302), FailureCategory::Unknown);
    }

    #[test]
    fn test_message_fallback() {
        assert_eq!(
            FailureCategory::from_message("Rate limit reached for gpt-4o"),
            FailureCategory::RateLimited
        );
        assert_eq!(
            FailureCategory::from_message("You exceeded your current quota"),
            FailureCategory::QuotaExhausted
        );
        assert_eq!(
            FailureCategory::from_message("Incorrect API key provided"),
            FailureCategory::Authentication
        );
        assert_eq!(
            FailureCategory::from_message("connection reset"),
            FailureCategory::Unknown
        );
    }

    #[test]
    fn test_unknown_status_falls_back_to_message() {
        let cat = FailureCategory::classify(None, Some(418), "too many requests, slow down");
        assert_eq!(cat, FailureCategory::RateLimited);
    }

    #[test]
    fn test_into_error_taxonomy() {
        let rl = ProviderFailure::new("slow down")
            .with_status(429)
            .with_retry_after(Some(Duration::from_secs(12)))
            .into_error("openai");
        assert!(rl.is_rate_limit());
        assert_eq!(rl.retry_after(), Some(Duration::from_secs(12)));

        let auth = ProviderFailure::new("bad key").with_status(401).into_error("openai");
        assert!(matches!(auth, Error::Configuration { .. }));

        let server = ProviderFailure::new("oops").with_status(500).into_error("openai");
        assert!(matches!(
            server,
            Error::Api {
                category: FailureCategory::ServerError,
                status: Some(500),
                ..
            }
        ));
        assert!(server.is_retryable());
    }

    #[test]
    fn test_code_from_body() {
        let openai = r#"{"error":{"message":"x","type":"requests","code":"rate_limit_exceeded"}}"#;
        assert_eq!(provider_code_from_body(openai).as_deref(), Some("rate_limit_exceeded"));
        let anthropic = r#"{"type":"error","error":{"type":"overloaded_error","message":"x"}}"#;
        assert_eq!(provider_code_from_body(anthropic).as_deref(), Some("overloaded_error"));
        assert_eq!(provider_code_from_body("<html>"), None);
    }
}
