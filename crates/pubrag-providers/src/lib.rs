//! # PubRAG Providers
//!
//! Generation service clients. Every supported service speaks the OpenAI
//! chat-completions dialect and is handled by `OpenAiCompatibleProvider`;
//! `FailoverProvider` chains several of them.

pub mod failover;
pub mod openai_compatible;
pub mod provider_registry;

use pubrag_core::config::{LlmConfig, PubragConfig};
use pubrag_core::error::{PubragError, Result};
use pubrag_core::traits::Provider;

/// Create a single provider by name.
pub fn create_named_provider(name: &str, llm: &LlmConfig) -> Result<Box<dyn Provider>> {
    match name {
        // Custom endpoint: "custom:https://my-server.com/v1"
        other if other.starts_with("custom:") => Ok(Box::new(
            openai_compatible::OpenAiCompatibleProvider::custom(other, llm)?,
        )),

        _ => {
            let registry = provider_registry::get_provider_config(name)
                .ok_or_else(|| PubragError::ProviderNotFound(name.into()))?;
            Ok(Box::new(
                openai_compatible::OpenAiCompatibleProvider::from_registry(registry, llm)?,
            ))
        }
    }
}

/// Create the generation provider from configuration, wrapped in a failover
/// chain when `llm.fallbacks` is non-empty.
pub fn create_provider(config: &PubragConfig) -> Result<Box<dyn Provider>> {
    let primary = create_named_provider(&config.llm.provider, &config.llm)?;
    if config.llm.fallbacks.is_empty() {
        return Ok(primary);
    }

    // Fallbacks resolve their own keys and endpoints
    let fallback_llm = LlmConfig {
        api_key: String::new(),
        endpoint: String::new(),
        ..config.llm.clone()
    };
    let mut chain = vec![primary];
    for name in &config.llm.fallbacks {
        match create_named_provider(name, &fallback_llm) {
            Ok(p) => chain.push(p),
            Err(e) => tracing::warn!("⚠️ Skipping fallback provider {name}: {e}"),
        }
    }
    tracing::debug!("📦 Provider chain: {} entries", chain.len());
    Ok(Box::new(failover::FailoverProvider::new(chain)?))
}

/// List all available provider names.
pub fn available_providers() -> Vec<&'static str> {
    let mut names = provider_registry::all_provider_names();
    names.push("custom");
    names
}
