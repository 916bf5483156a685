use std::sync::Arc;

use tracing::{info, warn};

use super::{CapabilityKind, ProviderAdapter, adapters};
use crate::core::config::ProviderConfig;

/// A configured provider: its static description plus the adapter that talks to it.
#[derive(Clone)]
pub struct Provider {
    pub config: ProviderConfig,
    pub adapter: Arc<dyn ProviderAdapter>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.config.id)
            .field("capability", &self.config.capability)
            .field("priority", &self.config.priority)
            .finish()
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Provider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every configured provider. Providers that cannot be
    /// constructed (missing credentials, bad settings) are skipped with a warning.
    pub fn from_configs(configs: &[ProviderConfig]) -> Self {
        let client = reqwest::Client::new();
        let mut registry = Self::new();
        for cfg in configs {
            match adapters::build(cfg, client.clone()) {
                Ok(adapter) => registry.register(cfg.clone(), adapter),
                Err(e) => warn!("Skipping provider '{}': {}", cfg.id, e),
            }
        }
        registry
    }

    pub fn register(&mut self, config: ProviderConfig, adapter: Arc<dyn ProviderAdapter>) {
        info!(
            "Registered provider: {} ({}, priority {})",
            config.id, config.capability, config.priority
        );
        self.providers.push(Provider { config, adapter });
    }

    /// Providers for a capability in fallback order. Equal priorities keep
    /// registration order.
    pub fn for_capability(&self, capability: CapabilityKind) -> Vec<Provider> {
        let mut out: Vec<Provider> = self
            .providers
            .iter()
            .filter(|p| p.config.capability == capability)
            .cloned()
            .collect();
        out.sort_by_key(|p| p.config.priority);
        out
    }

    pub fn get(&self, id: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.config.id == id)
    }

    pub fn list(&self) -> &[Provider] {
        &self.providers
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
