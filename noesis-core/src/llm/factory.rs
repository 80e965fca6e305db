//! Factory for creating LLM providers from configuration

use crate::config::{LlmSettings, ProviderKind};
use crate::error::Result;
use crate::llm::scripted::{ScriptedOracle, ScriptedReply};
use crate::llm::LLMProvider;
use std::sync::Arc;

#[cfg(feature = "llm-anthropic")]
use crate::llm::providers::anthropic::{AnthropicProvider, DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Reply of the offline `stub` provider
pub const STUB_REPLY: &str = "(stub oracle) No LLM provider is configured.";

/// Factory for creating LLM providers
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    /// Create an LLM provider from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be created (e.g., missing API key)
    pub fn create(settings: &LlmSettings) -> Result<Arc<dyn LLMProvider>> {
        match settings.provider {
            #[cfg(feature = "llm-anthropic")]
            ProviderKind::Anthropic => {
                let model = settings
                    .model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_MODEL.to_string());

                let provider = match &settings.api_key {
                    Some(api_key) => AnthropicProvider::with_base_url(
                        api_key.clone(),
                        model,
                        settings.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
                    ),
                    None => AnthropicProvider::from_env(Some(model))?,
                };

                let provider = provider
                    .with_timeout(settings.timeout)?
                    .with_default_max_tokens(settings.max_tokens);

                tracing::info!(model = %provider.model(), "Using Anthropic oracle");
                Ok(Arc::new(provider))
            }

            #[cfg(not(feature = "llm-anthropic"))]
            ProviderKind::Anthropic => Err(crate::error::NoesisError::Configuration(
                "Anthropic provider requires 'llm-anthropic' feature".to_string(),
            )),

            ProviderKind::Stub => {
                tracing::warn!("Using stub oracle; every answer is a fixed text");
                Ok(Arc::new(ScriptedOracle::repeating(ScriptedReply::text(
                    STUB_REPLY,
                ))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LLMConfig;

    #[tokio::test]
    async fn test_stub_provider() {
        let settings = LlmSettings {
            provider: ProviderKind::Stub,
            ..LlmSettings::default()
        };
        let oracle = LLMProviderFactory::create(&settings).unwrap();

        let first = oracle.generate("hi", &LLMConfig::default()).await.unwrap();
        let second = oracle.generate("again", &LLMConfig::default()).await.unwrap();
        assert_eq!(first, STUB_REPLY);
        assert_eq!(second, STUB_REPLY);
    }

    #[cfg(feature = "llm-anthropic")]
    #[test]
    fn test_anthropic_with_explicit_key() {
        let settings = LlmSettings {
            api_key: Some("sk-test".to_string()),
            model: Some("claude-test".to_string()),
            ..LlmSettings::default()
        };
        let oracle = LLMProviderFactory::create(&settings).unwrap();
        let info = oracle.model_info();
        assert_eq!(info.provider, "anthropic");
        assert_eq!(info.model_name, "claude-test");
    }
}
