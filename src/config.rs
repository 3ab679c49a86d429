//! Pipeline configuration, read once at startup.
//!
//! ```yaml
//! concurrency:
//!   global_limit: 6
//!   lease_ttl_secs: 300
//!   limits:
//!     translation: 4
//!     analysis: 2
//!     extraction: 1
//! rate_limit:
//!   max_wait_secs: 60
//! retry:
//!   max_rate_limit_retries: 3
//!   base_delay: 1000        # milliseconds
//! providers:
//!   openai:
//!     model: gpt-4o-mini
//!     requests_per_minute: 60
//!     requests_per_day: 10000
//!   anthropic:
//!     model: claude-3-5-haiku-latest
//!     api_key_env: CLAUDE_KEY
//!     requests_per_minute: 50
//! runner:
//!   provider: openai
//!   poll_interval_secs: 5
//!   batch_size: 20
//! ```
//!
//! Credentials never live in the file: each provider reads `<NAME>_API_KEY` from the
//! environment unless `api_key_env` names another variable.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::concurrency::{ConcurrencyLimits, ConcurrencyManager, SlotStore};
use crate::jobs::{JobStore, JobType};
use crate::provider::{ProviderRegistry, ProviderSettings};
use crate::resilience::{RateLimiter, RateQuota, RateWindowStore, RetryPolicy};
use crate::runner::{BatchLimit, BatchRunner, Worker};
use crate::tasks::Handlers;
use crate::{Error, ErrorContext, Result};

fn default_global_limit() -> u32 {
    5
}

fn default_lease_ttl_secs() -> u64 {
    300
}

fn default_max_wait_secs() -> u64 {
    60
}

fn default_poll_interval_secs() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_global_limit")]
    pub global_limit: u32,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    /// Per-type caps; a missing type is bounded by `global_limit` alone.
    #[serde(default)]
    pub limits: HashMap<JobType, u32>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            global_limit: default_global_limit(),
            lease_ttl_secs: default_lease_ttl_secs(),
            limits: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub model: String,
    /// Environment variable holding the API key; defaults to `<NAME>_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_day: Option<u32>,
    /// Extra request-body fields sent with every call.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl ProviderConfig {
    pub fn quota(&self) -> RateQuota {
        RateQuota {
            requests_per_minute: self.requests_per_minute,
            requests_per_day: self.requests_per_day,
        }
    }

    pub fn api_key_var(&self, name: &str) -> String {
        self.api_key_env
            .clone()
            .unwrap_or_else(|| format!("{}_API_KEY", name.to_uppercase().replace('-', "_")))
    }

    /// Settings with the credential resolved from the environment.
    ///
    /// A missing key is left unset here; the driver reports it as a configuration error
    /// when the provider is built.
    pub fn settings(&self, name: &str) -> ProviderSettings {
        let mut settings = ProviderSettings::new(self.model.clone());
        settings.api_key = env::var(self.api_key_var(name))
            .ok()
            .filter(|k| !k.trim().is_empty());
        settings.base_url = self.base_url.clone();
        settings.timeout = self.timeout_secs.map(Duration::from_secs);
        settings.options = self.options.clone();
        settings
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Key into `providers`.
    pub provider: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Jobs per batch; unset runs each batch until the queue is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Job types this worker serves; unset serves all of them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_types: Option<Vec<JobType>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    pub providers: BTreeMap<String, ProviderConfig>,
    pub runner: RunnerConfig,
}

fn config_error(message: impl Into<String>, field: impl Into<String>) -> Error {
    Error::configuration_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("pipeline_config"),
    )
}

impl PipelineConfig {
    /// Parse and validate.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.concurrency;
        if c.global_limit == 0 {
            return Err(config_error(
                "global limit must be positive",
                "concurrency.global_limit",
            ));
        }
        if c.lease_ttl_secs == 0 {
            return Err(config_error(
                "lease TTL must be positive",
                "concurrency.lease_ttl_secs",
            ));
        }
        for job_type in JobType::ALL {
            let Some(&limit) = c.limits.get(&job_type) else {
                continue;
            };
            let field = format!("concurrency.limits.{}", job_type);
            if limit == 0 {
                return Err(config_error("per-type limit must be positive", field));
            }
            if limit > c.global_limit {
                return Err(Error::configuration_with_context(
                    "per-type limit exceeds the global limit",
                    ErrorContext::new()
                        .with_field_path(field)
                        .with_details(format!("{} > {}", limit, c.global_limit))
                        .with_source("pipeline_config"),
                ));
            }
        }

        if self.providers.is_empty() {
            return Err(config_error("at least one provider is required", "providers"));
        }
        for (name, p) in &self.providers {
            let field = |key: &str| format!("providers.{}.{}", name, key);
            let well_formed = !name.is_empty()
                && name
                    .chars()
                    .all(|ch| matches!(ch, 'a'..='z' | '0'..='9' | '_' | '-'));
            if !well_formed {
                return Err(config_error(
                    format!("provider name '{}' must be lowercase", name),
                    format!("providers.{}", name),
                ));
            }
            if p.model.trim().is_empty() {
                return Err(config_error("model is required", field("model")));
            }
            if let Some(raw) = &p.base_url {
                let parsed = url::Url::parse(raw).map_err(|e| {
                    config_error(format!("invalid base URL '{}': {}", raw, e), field("base_url"))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(config_error(
                        format!("base URL '{}' must use http or https", raw),
                        field("base_url"),
                    ));
                }
            }
            if p.timeout_secs == Some(0) {
                return Err(config_error("timeout must be positive", field("timeout_secs")));
            }
            if p.requests_per_minute == Some(0) {
                return Err(config_error(
                    "requests_per_minute must be positive (omit it for no limit)",
                    field("requests_per_minute"),
                ));
            }
            if p.requests_per_day == Some(0) {
                return Err(config_error(
                    "requests_per_day must be positive (omit it for no limit)",
                    field("requests_per_day"),
                ));
            }
        }

        if !self.providers.contains_key(&self.runner.provider) {
            return Err(Error::configuration_with_context(
                format!("runner provider '{}' is not configured", self.runner.provider),
                ErrorContext::new()
                    .with_field_path("runner.provider")
                    .with_details(format!(
                        "configured: {}",
                        self.providers.keys().cloned().collect::<Vec<_>>().join(", ")
                    ))
                    .with_source("pipeline_config"),
            ));
        }
        if self.runner.poll_interval_secs == 0 {
            return Err(config_error(
                "poll interval must be positive",
                "runner.poll_interval_secs",
            ));
        }
        if self.runner.batch_size == Some(0) {
            return Err(config_error("batch size must be positive", "runner.batch_size"));
        }
        Ok(())
    }

    /// Every configured provider name must have a driver in `registry`.
    pub fn check_registered(&self, registry: &ProviderRegistry) -> Result<()> {
        for name in self.providers.keys() {
            if !registry.contains(name) {
                return Err(Error::ProviderNotFound {
                    name: name.clone(),
                    known: registry.names(),
                });
            }
        }
        Ok(())
    }

    pub fn concurrency_limits(&self) -> ConcurrencyLimits {
        self.concurrency
            .limits
            .iter()
            .fold(
                ConcurrencyLimits::new(self.concurrency.global_limit),
                |limits, (&job_type, &limit)| limits.with_limit(job_type, limit),
            )
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.concurrency.lease_ttl_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.rate_limit.max_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.runner.poll_interval_secs)
    }

    pub fn batch_limit(&self) -> BatchLimit {
        match self.runner.batch_size {
            Some(n) => BatchLimit::Count(n),
            None => BatchLimit::UntilEmpty,
        }
    }

    pub fn provider(&self, name: &str) -> Result<&ProviderConfig> {
        self.providers.get(name).ok_or_else(|| Error::ProviderNotFound {
            name: name.to_string(),
            known: self.providers.keys().cloned().collect(),
        })
    }

    pub fn concurrency_manager(&self, store: Arc<dyn SlotStore>) -> ConcurrencyManager {
        ConcurrencyManager::new(store, self.concurrency_limits()).with_lease_ttl(self.lease_ttl())
    }

    /// Limiter over `store`. Every worker sharing a provider account must pass the same store.
    pub fn rate_limiter(&self, store: Arc<dyn RateWindowStore>) -> RateLimiter {
        RateLimiter::new(store)
    }

    /// Runner for `runner.provider`, with its quota, wait budget and retry policy.
    pub fn build_runner(
        &self,
        registry: &ProviderRegistry,
        jobs: Arc<dyn JobStore>,
        concurrency: Arc<ConcurrencyManager>,
        limiter: Arc<RateLimiter>,
        handlers: Handlers,
    ) -> Result<BatchRunner> {
        let name = &self.runner.provider;
        let provider_config = self.provider(name)?;
        let provider = registry.create(name, provider_config.settings(name))?;
        Ok(
            BatchRunner::new(jobs, concurrency, limiter, provider, handlers)
                .with_quota(provider_config.quota())
                .with_max_wait(self.max_wait())
                .with_retry_policy(self.retry.clone()),
        )
    }

    pub fn build_worker(&self, runner: Arc<BatchRunner>) -> Worker {
        let worker = Worker::new(runner)
            .with_poll_interval(self.poll_interval())
            .with_batch_limit(self.batch_limit());
        match &self.runner.job_types {
            Some(types) => worker.with_job_types(types.clone()),
            None => worker,
        }
    }
}
