//! Shared HTTP transport for provider drivers.

use reqwest::header::HeaderMap;
use reqwest::Proxy;
use serde_json::Value;
use std::env;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::classify::{provider_code_from_body, FailureCategory, ProviderFailure};
use crate::resilience::rate_limiter::DAY_WINDOW;
use crate::structured::preview;
use crate::{Error, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct HttpTransport {
    client: reqwest::Client,
    provider: String,
}

impl HttpTransport {
    /// Build a client for one provider.
    ///
    /// `AI_HTTP_TIMEOUT_SECS` overrides the default timeout when none is configured;
    /// `AI_PROXY_URL` routes traffic through a proxy.
    pub fn new(provider: &str, timeout: Option<Duration>) -> Result<Self> {
        let timeout = timeout.unwrap_or_else(|| {
            Duration::from_secs(
                env::var("AI_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            )
        });

        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        if let Ok(proxy_url) = env::var("AI_PROXY_URL") {
            let proxy = Proxy::all(&proxy_url).map_err(|e| {
                Error::configuration(format!("invalid AI_PROXY_URL '{}': {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            provider: provider.to_string(),
        })
    }

    /// Best-effort parsing of `Retry-After: <seconds>`, capped at one day.
    fn retry_after(headers: &HeaderMap) -> Option<Duration> {
        let raw = headers.get("retry-after")?.to_str().ok()?.trim();
        let secs: f64 = raw.parse().ok()?;
        if !(secs.is_finite() && secs >= 0.0) {
            return None;
        }
        Some(Duration::try_from_secs_f64(secs).map_or(DAY_WINDOW, |d| d.min(DAY_WINDOW)))
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        let category = if e.is_timeout() {
            FailureCategory::Timeout
        } else {
            FailureCategory::Network
        };
        Error::Api {
            provider: self.provider.clone(),
            category,
            status: e.status().map(|s| s.as_u16()),
            message: preview(&e.to_string()),
        }
    }

    /// POST a JSON body and return the decoded JSON response.
    ///
    /// Non-2xx responses are classified into the shared error taxonomy.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<Value> {
        let start = Instant::now();
        let mut request = self.client.post(url).json(body);
        for (k, v) in headers {
            request = request.header(*k, v);
        }

        let resp = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = resp.status().as_u16();

        if !resp.status().is_success() {
            let retry_after = Self::retry_after(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            let mut failure = ProviderFailure::new(preview(&text))
                .with_status(status)
                .with_retry_after(retry_after);
            if let Some(code) = provider_code_from_body(&text) {
                failure = failure.with_provider_code(code);
            }
            info!(
                provider = self.provider.as_str(),
                http_status = status,
                category = failure.category().name(),
                duration_ms = start.elapsed().as_millis() as u64,
                "provider request failed"
            );
            return Err(failure.into_error(&self.provider));
        }

        let bytes = resp.bytes().await.map_err(|e| self.transport_error(e))?;
        debug!(
            provider = self.provider.as_str(),
            http_status = status,
            duration_ms = start.elapsed().as_millis() as u64,
            bytes = bytes.len(),
            "provider request succeeded"
        );
        serde_json::from_slice(&bytes).map_err(|e| Error::Api {
            provider: self.provider.clone(),
            category: FailureCategory::ServerError,
            status: Some(status),
            message: format!("response body is not JSON: {}", e),
        })
    }
}
