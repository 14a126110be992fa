// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0

// Model Provider Registry - Model Routing and Alias Resolution
//
// Routes each completion to the adapter that serves its model, resolving
// aliases first. The registry implements [`ModelProvider`] itself so the
// runners never know which vendor is behind a model name. There is no
// retry or fallback loop here: the engine's only provider-level retry is
// the single empty-response retry inside the runner.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::engine_config::{EngineSpec, ProviderConfig};
use crate::domain::provider::{
    CompletionRequest, CompletionResponse, ModelProvider, ProviderError,
};

use super::anthropic::AnthropicAdapter;
use super::openai::OpenAIAdapter;

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    /// Concrete model identifier -> provider name
    model_map: HashMap<String, String>,
    /// Alias -> concrete model identifier
    aliases: HashMap<String, String>,
    default_provider: Option<String>,
}

impl ProviderRegistry {
    /// Build the registry from the engine configuration. A provider that
    /// fails to initialize (typically a missing API key variable) is
    /// skipped with a warning; its models simply stay unroutable.
    pub fn from_config(spec: &EngineSpec) -> anyhow::Result<Self> {
        let mut providers = HashMap::new();
        let mut model_map = HashMap::new();

        info!("Initializing model provider registry");

        for provider_config in &spec.providers {
            if !provider_config.enabled {
                info!("Provider '{}' disabled, skipping", provider_config.name);
                continue;
            }

            match Self::create_provider(provider_config) {
                Ok(provider) => {
                    providers.insert(provider_config.name.clone(), provider);
                    for model in &provider_config.models {
                        info!(
                            "Mapping model '{}' -> provider '{}'",
                            model, provider_config.name
                        );
                        model_map.insert(model.clone(), provider_config.name.clone());
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to initialize provider '{}': {}",
                        provider_config.name, e
                    );
                }
            }
        }

        if providers.is_empty() {
            warn!("No model providers configured - executions will be rejected");
        }

        Ok(Self {
            providers,
            model_map,
            aliases: spec.model_aliases.clone(),
            default_provider: spec.default_provider.clone(),
        })
    }

    fn create_provider(config: &ProviderConfig) -> anyhow::Result<Arc<dyn ModelProvider>> {
        let api_key = Self::resolve_api_key(&config.api_key)?;

        let provider: Arc<dyn ModelProvider> = match config.provider_type.as_str() {
            // OpenAI-compatible APIs (LM Studio, vLLM, etc.) share the adapter
            "openai" | "openai-compatible" => {
                Arc::new(OpenAIAdapter::new(config.endpoint.clone(), api_key))
            }
            "anthropic" => Arc::new(AnthropicAdapter::new(config.endpoint.clone(), api_key)),
            _ => anyhow::bail!("Unsupported provider type: {}", config.provider_type),
        };

        Ok(provider)
    }

    /// Resolve API key from config (supports "env:VAR_NAME" syntax)
    fn resolve_api_key(key: &Option<String>) -> anyhow::Result<String> {
        match key {
            Some(k) if k.starts_with("env:") => {
                let var_name = k.strip_prefix("env:").unwrap();
                std::env::var(var_name)
                    .map_err(|_| anyhow::anyhow!("Environment variable not set: {}", var_name))
            }
            Some(k) => Ok(k.clone()),
            None => Ok(String::new()), // For local providers without auth
        }
    }

    /// Resolve an alias to its concrete model identifier. Names without an
    /// alias entry pass through unchanged.
    pub fn resolve_model(&self, name: &str) -> String {
        self.aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn provider_for(&self, model: &str) -> Result<&Arc<dyn ModelProvider>, ProviderError> {
        let name = self
            .model_map
            .get(model)
            .or(self.default_provider.as_ref())
            .ok_or_else(|| ProviderError::ModelNotFound(model.to_string()))?;

        self.providers
            .get(name)
            .ok_or_else(|| ProviderError::ModelNotFound(model.to_string()))
    }
}

#[async_trait]
impl ModelProvider for ProviderRegistry {
    async fn complete(
        &self,
        mut request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let model = self.resolve_model(&request.model);
        let provider = self.provider_for(&model)?;
        request.model = model;
        provider.complete(request).await
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        for (name, provider) in &self.providers {
            if let Err(error) = provider.health_check().await {
                warn!("Provider '{}' failed health check: {}", name, error);
                return Err(error);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{scripted, text_response, ScriptedProvider};
    use crate::domain::conversation::ConversationMessage;
    use crate::domain::engine_config::EngineConfigManifest;

    fn registry_with(
        provider: Arc<ScriptedProvider>,
        models: &[&str],
        aliases: &[(&str, &str)],
        default: Option<&str>,
    ) -> ProviderRegistry {
        let mut providers: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();
        providers.insert("scripted".to_string(), provider);
        ProviderRegistry {
            providers,
            model_map: models
                .iter()
                .map(|m| (m.to_string(), "scripted".to_string()))
                .collect(),
            aliases: aliases
                .iter()
                .map(|(a, m)| (a.to_string(), m.to_string()))
                .collect(),
            default_provider: default.map(str::to_string),
        }
    }

    fn hello(model: &str) -> CompletionRequest {
        CompletionRequest::new(model, vec![ConversationMessage::user("hi")])
    }

    #[tokio::test]
    async fn routes_by_model_and_rewrites_aliases() {
        let provider = scripted(vec![Ok(text_response("ok", 1, 1))]);
        let registry = registry_with(
            provider.clone(),
            &["gpt-4o-mini"],
            &[("fast", "gpt-4o-mini")],
            None,
        );

        registry.complete(hello("fast")).await.unwrap();

        // The adapter must see the concrete model, not the alias
        assert_eq!(provider.captured()[0].model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn unrouted_models_fall_back_to_the_default_provider() {
        let provider = scripted(vec![Ok(text_response("ok", 1, 1))]);
        let registry = registry_with(provider.clone(), &[], &[], Some("scripted"));

        registry.complete(hello("some-new-model")).await.unwrap();
        assert_eq!(provider.captured()[0].model, "some-new-model");
    }

    #[tokio::test]
    async fn unknown_model_without_default_is_rejected() {
        let provider = scripted(vec![]);
        let registry = registry_with(provider.clone(), &["gpt-4o-mini"], &[], None);

        let error = registry.complete(hello("mystery")).await.unwrap_err();
        assert!(matches!(error, ProviderError::ModelNotFound(model) if model == "mystery"));
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn builds_from_manifest_and_resolves_env_keys() {
        std::env::set_var("CORTEX_TEST_PROVIDER_KEY", "sk-test");
        let manifest = EngineConfigManifest::from_yaml_str(
            r#"
apiVersion: cortex.dev/v1
kind: EngineConfig
metadata:
  name: test
spec:
  providers:
    - name: openai
      type: openai
      endpoint: https://api.openai.com/v1
      api_key: env:CORTEX_TEST_PROVIDER_KEY
      models: ["gpt-4o-mini"]
    - name: dead
      type: openai
      endpoint: https://example.invalid/v1
      api_key: env:CORTEX_TEST_MISSING_KEY
      models: ["other-model"]
    - name: legacy
      type: anthropic
      endpoint: https://api.anthropic.com/v1
      api_key: literal-key
      enabled: false
      models: ["claude-sonnet-4-5"]
  model_aliases:
    fast: gpt-4o-mini
  default_provider: openai
"#,
        )
        .unwrap();

        let registry = ProviderRegistry::from_config(&manifest.spec).unwrap();
        std::env::remove_var("CORTEX_TEST_PROVIDER_KEY");

        // The provider with the missing key and the disabled one are skipped
        assert!(registry.providers.contains_key("openai"));
        assert!(!registry.providers.contains_key("dead"));
        assert!(!registry.providers.contains_key("legacy"));
        assert_eq!(registry.model_map.get("gpt-4o-mini").unwrap(), "openai");
        assert!(!registry.model_map.contains_key("other-model"));
        assert_eq!(registry.resolve_model("fast"), "gpt-4o-mini");
        assert_eq!(registry.resolve_model("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn rejects_unsupported_provider_types() {
        let config = ProviderConfig {
            name: "mystery".to_string(),
            provider_type: "carrier-pigeon".to_string(),
            endpoint: "https://example.com".to_string(),
            api_key: None,
            enabled: true,
            models: vec!["pigeon-1".to_string()],
        };
        assert!(ProviderRegistry::create_provider(&config).is_err());
    }
}
