//! Provider registry: lowercase name → factory.
//!
//! The registry is built once at startup and handed to the runner; there is no global
//! instance. Factories are checked when registered (name shape, no duplicates) and the
//! providers they build are checked when created (the provider must report the name it
//! was registered under).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{AnthropicProvider, ChatProvider, OpenAiProvider, ProviderSettings};
use crate::{Error, ErrorContext, Result};

/// Builds a provider from its registry name and settings.
pub type ProviderFactory =
    Arc<dyn Fn(&str, ProviderSettings) -> Result<Arc<dyn ChatProvider>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `openai` and `anthropic` drivers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let openai: ProviderFactory = Arc::new(|name: &str, settings: ProviderSettings| {
            Ok(Arc::new(OpenAiProvider::new(name, settings)?) as Arc<dyn ChatProvider>)
        });
        let anthropic: ProviderFactory = Arc::new(|name: &str, settings: ProviderSettings| {
            Ok(Arc::new(AnthropicProvider::new(name, settings)?) as Arc<dyn ChatProvider>)
        });
        registry.factories.insert("openai".to_string(), openai);
        registry.factories.insert("anthropic".to_string(), anthropic);
        registry
    }

    /// Register a factory under `name` (normalized to lowercase).
    ///
    /// Names must be non-empty and made of `[a-z0-9_-]`; re-registering a name is rejected.
    pub fn register(&mut self, name: &str, factory: ProviderFactory) -> Result<()> {
        let key = name.trim().to_lowercase();
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::validation_with_context(
                format!("invalid provider name '{}'", name),
                ErrorContext::new()
                    .with_details("expected lowercase letters, digits, '_' or '-'")
                    .with_source("provider_registry"),
            ));
        }
        if self.factories.contains_key(&key) {
            return Err(Error::validation_with_context(
                format!("provider '{}' is already registered", key),
                ErrorContext::new().with_source("provider_registry"),
            ));
        }
        self.factories.insert(key, factory);
        Ok(())
    }

    /// Instantiate the provider registered under `name`.
    pub fn create(&self, name: &str, settings: ProviderSettings) -> Result<Arc<dyn ChatProvider>> {
        let key = name.trim().to_lowercase();
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| Error::ProviderNotFound {
                name: name.to_string(),
                known: self.names(),
            })?;
        let provider = factory(&key, settings)?;
        if provider.name() != key {
            return Err(Error::validation_with_context(
                format!(
                    "factory for '{}' produced a provider named '{}'",
                    key,
                    provider.name()
                ),
                ErrorContext::new().with_source("provider_registry"),
            ));
        }
        Ok(provider)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.trim().to_lowercase())
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
