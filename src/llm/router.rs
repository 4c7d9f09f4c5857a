// src/llm/router.rs
// Model id -> adapter routing, built once at startup from credentials and the
// model catalog.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{ModelEntry, Overlay, Settings};

use super::providers::{AnthropicProvider, GeminiProvider, OpenAiProvider, PerplexityProvider};
use super::ChatProvider;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    #[error("Provider '{provider}' is not configured for model '{model}'. Set its API key in the environment.")]
    ProviderNotConfigured { provider: String, model: String },
}

pub struct LlmRouter {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    model_provider_map: HashMap<String, String>,
    catalog: Vec<ModelEntry>,
}

impl LlmRouter {
    /// Construct one adapter per provider whose credential is present.
    pub fn from_config(settings: &Settings, overlay: &Overlay) -> Self {
        let mut providers: HashMap<String, Arc<dyn ChatProvider>> = HashMap::new();

        if let Some(key) = &settings.openai_api_key {
            providers.insert("openai".to_string(), Arc::new(OpenAiProvider::new(key.clone())));
        }
        if let Some(key) = &settings.anthropic_api_key {
            providers.insert(
                "anthropic".to_string(),
                Arc::new(AnthropicProvider::new(key.clone())),
            );
        }
        if let Some(key) = &settings.google_api_key {
            providers.insert("google".to_string(), Arc::new(GeminiProvider::new(key.clone())));
        }
        if let Some(key) = &settings.perplexity_api_key {
            providers.insert(
                "perplexity".to_string(),
                Arc::new(PerplexityProvider::new(key.clone())),
            );
        }

        let mut names: Vec<_> = providers.keys().cloned().collect();
        names.sort();
        info!(providers = ?names, "LLM router ready");

        Self::with_providers(overlay.models.available.clone(), providers)
    }

    /// Assemble a router from an explicit provider set. Used by
    /// `from_config` and by tests that substitute stub providers.
    pub fn with_providers(
        catalog: Vec<ModelEntry>,
        providers: HashMap<String, Arc<dyn ChatProvider>>,
    ) -> Self {
        let model_provider_map = catalog
            .iter()
            .map(|m| (m.id.clone(), m.provider.clone()))
            .collect();
        Self {
            providers,
            model_provider_map,
            catalog,
        }
    }

    pub fn route(&self, model_id: &str) -> Result<Arc<dyn ChatProvider>, RouteError> {
        let provider_name = self
            .model_provider_map
            .get(model_id)
            .ok_or_else(|| RouteError::UnknownModel(model_id.to_string()))?;
        self.providers
            .get(provider_name)
            .cloned()
            .ok_or_else(|| RouteError::ProviderNotConfigured {
                provider: provider_name.clone(),
                model: model_id.to_string(),
            })
    }

    pub fn provider_name(&self, model_id: &str) -> Option<&str> {
        self.model_provider_map.get(model_id).map(String::as_str)
    }

    /// Catalog entries whose provider has credentials.
    pub fn available_models(&self) -> Vec<ModelEntry> {
        self.catalog
            .iter()
            .filter(|m| self.providers.contains_key(&m.provider))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, StreamEvent};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct StubProvider;

    #[async_trait]
    impl ChatProvider for StubProvider {
        fn provider_name(&self) -> &'static str {
            "stub"
        }

        async fn stream_chat(
            &self,
            _messages: Vec<ChatMessage>,
            _model: &str,
            _temperature: f32,
            _max_tokens: u32,
            tx: mpsc::Sender<StreamEvent>,
        ) {
            let _ = tx.send(StreamEvent::final_empty()).await;
        }
    }

    fn catalog() -> Vec<ModelEntry> {
        vec![
            ModelEntry {
                id: "gpt-4o".into(),
                name: "GPT-4o".into(),
                provider: "openai".into(),
                max_tokens: 4096,
            },
            ModelEntry {
                id: "claude-sonnet".into(),
                name: "Claude".into(),
                provider: "anthropic".into(),
                max_tokens: 8192,
            },
        ]
    }

    fn router_with_openai_only() -> LlmRouter {
        let mut providers: HashMap<String, Arc<dyn ChatProvider>> = HashMap::new();
        providers.insert("openai".into(), Arc::new(StubProvider));
        LlmRouter::with_providers(catalog(), providers)
    }

    #[test]
    fn routes_configured_model() {
        let router = router_with_openai_only();
        assert!(router.route("gpt-4o").is_ok());
    }

    #[test]
    fn unknown_model_errors() {
        let router = router_with_openai_only();
        let err = router.route("made-up-model").err().expect("route must fail");
        match err {
            RouteError::UnknownModel(id) => assert_eq!(id, "made-up-model"),
            other => panic!("expected UnknownModel, got {other:?}"),
        }
    }

    #[test]
    fn unconfigured_provider_errors() {
        let router = router_with_openai_only();
        let err = router.route("claude-sonnet").err().expect("route must fail");
        match err {
            RouteError::ProviderNotConfigured { provider, .. } => {
                assert_eq!(provider, "anthropic");
            }
            other => panic!("expected ProviderNotConfigured, got {other:?}"),
        }
    }

    #[test]
    fn available_models_requires_credentials() {
        let router = router_with_openai_only();
        let available = router.available_models();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, "gpt-4o");
    }
}
