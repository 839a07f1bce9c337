//! Registry mapping provider names to their factories.
//!
//! The registry is filled once during startup through [`ProviderRegistry::register`]
//! (which needs `&mut self`) and is then frozen behind an `Arc` and shared by
//! every request. There is no way to mutate it after that point, so readers
//! need no locking.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use crate::config::Config;
use crate::provider::{
    elastictranscoder, Description, Factory, Health, ProviderError, TranscodingProvider,
};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("provider {0:?} is already registered")]
    Duplicate(String),
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Factory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every backend this crate ships with.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.factories.insert(
            elastictranscoder::NAME.to_string(),
            Arc::new(elastictranscoder::factory),
        );
        registry
    }

    /// Install `factory` under `name`.
    ///
    /// Registering a name twice fails and leaves the first factory in place.
    pub fn register(&mut self, name: &str, factory: Factory) -> Result<(), RegistryError> {
        if self.factories.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        debug!(provider = name, "Registering provider");
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn factory(&self, name: &str) -> Result<Factory, ProviderError> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::NotRegistered(name.to_string()))
    }

    /// Resolve `name` and construct a fresh provider instance.
    pub fn build(
        &self,
        name: &str,
        config: &Config,
    ) -> Result<Box<dyn TranscodingProvider>, ProviderError> {
        let factory = self.factory(name)?;
        factory(config)
    }

    /// Names of all registered providers, whether or not they are configured.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Names of the providers that can be built with `config`, sorted.
    pub fn list_providers(&self, config: &Config) -> Vec<String> {
        self.factories
            .iter()
            .filter(|(_, factory)| factory(config).is_ok())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub async fn describe(&self, name: &str, config: &Config) -> Result<Description, ProviderError> {
        let factory = self.factory(name)?;
        let provider = match factory(config) {
            Ok(provider) => provider,
            Err(ProviderError::InvalidConfig(message)) => {
                return Ok(Description {
                    name: name.to_string(),
                    capabilities: Default::default(),
                    health: Health {
                        ok: false,
                        message: Some(message),
                    },
                    enabled: false,
                });
            }
            Err(err) => return Err(err),
        };
        let health = match provider.healthcheck().await {
            Ok(()) => Health {
                ok: true,
                message: None,
            },
            Err(err) => Health {
                ok: false,
                message: Some(err.to_string()),
            },
        };
        Ok(Description {
            name: name.to_string(),
            capabilities: provider.capabilities(),
            health,
            enabled: true,
        })
    }

    /// Describe every registered provider concurrently.
    pub async fn describe_all(&self, config: &Config) -> Vec<Result<Description, ProviderError>> {
        join_all(self.names().map(|name| self.describe(name, config))).await
    }
}
