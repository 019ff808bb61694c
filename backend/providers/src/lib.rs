//! Model provider adapters for Confab.

pub mod mock;
pub mod openai;
pub mod prompt;
mod sse;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::info;

use confab_config::{LlmConfig, ProviderKind};
use confab_core::ModelProvider;

pub use mock::MockProvider;
pub use openai::OpenAiCompatProvider;
pub use prompt::{render_transcript, summary_prompt};

/// Build the configured provider.
pub fn build_provider(config: &LlmConfig) -> Result<Arc<dyn ModelProvider>> {
    let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty());

    let provider = match config.provider {
        ProviderKind::Mock => return Ok(Arc::new(MockProvider::new())),
        ProviderKind::OpenAi => match api_key {
            Some(key) => OpenAiCompatProvider::openai(key, &config.model),
            None => bail!("provider 'openai' requires llm.api_key"),
        },
        ProviderKind::OpenRouter => match api_key {
            Some(key) => OpenAiCompatProvider::openrouter(key, &config.model),
            None => bail!("provider 'openrouter' requires llm.api_key"),
        },
        ProviderKind::Ollama => {
            let provider = OpenAiCompatProvider::ollama(&config.model);
            match api_key {
                Some(key) => provider.with_api_key(key),
                None => provider,
            }
        }
    };

    let provider = match &config.base_url {
        Some(url) if !url.trim().is_empty() => provider.with_base_url(url),
        _ => provider,
    };
    let provider = provider
        .with_sampling(config.temperature, config.max_tokens)
        .with_timeout(Duration::from_secs(config.timeout_secs));

    info!(provider = config.provider.as_str(), model = %config.model, "Model provider ready");
    Ok(Arc::new(provider))
}
