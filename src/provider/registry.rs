//! Provider registry: descriptors plus adapters, ordered by priority weight.
//!
//! The registry is populated once at startup and then shared read-only across
//! orchestrator invocations. Descriptors are immutable after load.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ProviderConfig;
use crate::provider::AiProvider;

/// One registered provider: its static descriptor and its adapter.
#[derive(Clone)]
pub struct ProviderEntry {
    pub descriptor: Arc<ProviderConfig>,
    pub adapter: Arc<dyn AiProvider>,
}

/// Holds the ordered, polymorphic set of provider adapters.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider adapter with its descriptor.
    ///
    /// Re-registering a name replaces the previous entry; this supports test
    /// setups but is logged since production registration happens once.
    pub fn register(&mut self, descriptor: ProviderConfig, adapter: Arc<dyn AiProvider>) {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.descriptor.name == descriptor.name)
        {
            warn!(provider = %descriptor.name, "Provider already registered, replacing entry");
            existing.descriptor = Arc::new(descriptor);
            existing.adapter = adapter;
            return;
        }

        info!(
            provider = %descriptor.name,
            model = %descriptor.model,
            priority_weight = descriptor.priority_weight,
            timeout_ms = descriptor.timeout_ms,
            "Provider registered"
        );
        self.entries.push(ProviderEntry {
            descriptor: Arc::new(descriptor),
            adapter,
        });
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Option<&ProviderEntry> {
        self.entries.iter().find(|e| e.descriptor.name == name)
    }

    /// Candidate order for one generation request: the preferred provider first
    /// (if supplied and registered), then the rest by priority weight descending.
    pub fn candidates(&self, preferred: Option<&str>) -> Vec<ProviderEntry> {
        let mut rest: Vec<ProviderEntry> = self
            .entries
            .iter()
            .filter(|e| Some(e.descriptor.name.as_str()) != preferred)
            .cloned()
            .collect();
        rest.sort_by(|a, b| {
            b.descriptor
                .priority_weight
                .total_cmp(&a.descriptor.priority_weight)
        });

        let mut ordered = Vec::with_capacity(self.entries.len());
        if let Some(name) = preferred {
            if let Some(entry) = self.get(name) {
                ordered.push(entry.clone());
            } else {
                warn!(provider = %name, "Preferred provider not registered, ignoring");
            }
        }
        ordered.extend(rest);
        ordered
    }

    /// Registered provider names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.descriptor.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AiResponse, GenerationParams, ProviderError};
    use async_trait::async_trait;

    struct NullProvider(String);

    #[async_trait]
    impl crate::provider::AiProvider for NullProvider {
        fn name(&self) -> &str {
            &self.0
        }

        async fn call(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
        ) -> Result<AiResponse, ProviderError> {
            Err(ProviderError::EmptyResponse {
                provider: self.0.clone(),
            })
        }
    }

    fn descriptor(name: &str, weight: f64) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            priority_weight: weight,
            timeout_ms: 30_000,
            model: format!("{name}-default"),
            max_tokens: 4096,
            temperature: 0.7,
            cost_per_1k_tokens: 0.5,
        }
    }

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(
            descriptor("gemini", 1.0),
            Arc::new(NullProvider("gemini".into())),
        );
        registry.register(
            descriptor("openai", 3.0),
            Arc::new(NullProvider("openai".into())),
        );
        registry.register(
            descriptor("anthropic", 2.0),
            Arc::new(NullProvider("anthropic".into())),
        );
        registry
    }

    #[test]
    fn candidates_ordered_by_weight_descending() {
        let names: Vec<String> = registry()
            .candidates(None)
            .iter()
            .map(|e| e.descriptor.name.clone())
            .collect();
        assert_eq!(names, vec!["openai", "anthropic", "gemini"]);
    }

    #[test]
    fn preferred_provider_goes_first() {
        let names: Vec<String> = registry()
            .candidates(Some("gemini"))
            .iter()
            .map(|e| e.descriptor.name.clone())
            .collect();
        assert_eq!(names, vec!["gemini", "openai", "anthropic"]);
    }

    #[test]
    fn unknown_preferred_is_ignored() {
        let names: Vec<String> = registry()
            .candidates(Some("mistral"))
            .iter()
            .map(|e| e.descriptor.name.clone())
            .collect();
        assert_eq!(names, vec!["openai", "anthropic", "gemini"]);
    }
}
