//! Provider registry.
//!
//! Constructs and holds every configured LLM provider. Providers that fail
//! to initialize are logged and skipped; an empty registry is a valid,
//! explicit state that callers check with [`ProviderRegistry::is_empty`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use bk_domain::config::{LlmConfig, ProviderKind};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default_id: Option<String>,
}

impl ProviderRegistry {
    pub fn from_config(config: &LlmConfig) -> Self {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let mut registry = Self::default();

        for pc in &config.providers {
            let result = match pc.kind {
                ProviderKind::OpenaiCompat => OpenAiCompatProvider::from_config(pc, timeout)
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            };

            match result {
                Ok(provider) => {
                    tracing::info!(provider_id = %pc.id, kind = ?pc.kind, "registered LLM provider");
                    registry.insert(provider);
                }
                Err(e) => {
                    tracing::warn!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        error = %e,
                        "failed to initialize LLM provider, skipping"
                    );
                }
            }
        }

        if let Some(id) = &config.default_provider {
            if registry.providers.contains_key(id) {
                registry.default_id = Some(id.clone());
            } else {
                tracing::warn!(provider_id = %id, "default provider is not available");
            }
        }

        if registry.is_empty() {
            tracing::warn!("no LLM providers initialized; chat runs will report unavailable");
        }
        registry
    }

    /// Register a provider. The first one registered becomes the default
    /// unless a default was already chosen.
    pub fn insert(&mut self, provider: Arc<dyn LlmProvider>) {
        let id = provider.provider_id().to_string();
        if self.default_id.is_none() {
            self.default_id = Some(id.clone());
        }
        self.providers.insert(id, provider);
    }

    /// Registry holding exactly one provider, which is the default.
    pub fn single(provider: Arc<dyn LlmProvider>) -> Self {
        let mut registry = Self::default();
        registry.insert(provider);
        registry
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// The provider chat runs use, if any is available.
    pub fn default_provider(&self) -> Option<Arc<dyn LlmProvider>> {
        self.default_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// All registered provider ids, sorted.
    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedProvider;
    use bk_domain::config::ProviderConfig;

    #[test]
    fn empty_config_is_empty_registry() {
        let reg = ProviderRegistry::from_config(&LlmConfig::default());
        assert!(reg.is_empty());
        assert!(reg.default_provider().is_none());
    }

    #[test]
    fn provider_with_missing_key_is_skipped() {
        let cfg = LlmConfig {
            providers: vec![ProviderConfig {
                id: "openai".into(),
                kind: ProviderKind::OpenaiCompat,
                base_url: "https://api.openai.com/v1".into(),
                api_key_env: Some("BK_TEST_NEVER_SET_KEY_31337".into()),
                default_model: None,
            }],
            ..Default::default()
        };
        let reg = ProviderRegistry::from_config(&cfg);
        assert!(reg.is_empty());
    }

    #[test]
    fn first_inserted_becomes_default() {
        let mut reg = ProviderRegistry::default();
        reg.insert(Arc::new(ScriptedProvider::new("a", vec![])));
        reg.insert(Arc::new(ScriptedProvider::new("b", vec![])));
        assert_eq!(reg.default_provider().unwrap().provider_id(), "a");
        assert_eq!(reg.list_providers(), vec!["a".to_string(), "b".to_string()]);
    }
}
