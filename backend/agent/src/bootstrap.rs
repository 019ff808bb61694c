//! Wire an orchestrator from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use confab_config::ConfabConfig;
use confab_core::SessionStore;
use confab_memory::{CompressionSettings, InMemorySessionStore, SqliteSessionStore};
use confab_providers::build_provider;
use confab_tools::ToolRegistry;

use crate::gate::ConfirmationPolicy;
use crate::orchestrator::{Orchestrator, OrchestratorSettings};

impl OrchestratorSettings {
    pub fn from_config(config: &ConfabConfig) -> Self {
        let prompt = config.agent.system_prompt.trim();
        Self {
            max_steps: config.agent.max_steps,
            system_prompt: (!prompt.is_empty()).then(|| prompt.to_string()),
            confirmation_timeout: Duration::from_secs(config.confirmation.timeout_secs),
            policy: ConfirmationPolicy::from_config(&config.confirmation),
        }
    }
}

pub fn compression_settings(config: &ConfabConfig) -> CompressionSettings {
    CompressionSettings {
        max_characters: config.memory.max_characters,
        recent_characters: config.memory.recent_characters,
    }
}

pub fn open_store(config: &ConfabConfig) -> Result<Arc<dyn SessionStore>> {
    if config.storage.is_in_memory() {
        info!("Using in-memory session store");
        return Ok(Arc::new(InMemorySessionStore::new()));
    }
    let store = SqliteSessionStore::open(&config.storage.db_path)
        .with_context(|| format!("opening session store at {}", config.storage.db_path))?;
    Ok(Arc::new(store))
}

/// Build the orchestrator with the configured store, provider and the
/// built-in tools.
pub fn build_orchestrator(config: &ConfabConfig) -> Result<Orchestrator> {
    let store = open_store(config)?;
    let provider = build_provider(&config.llm)?;
    let registry = ToolRegistry::builtin();
    info!(
        provider = provider.name(),
        tools = ?registry.list(),
        policy = ?config.confirmation.policy,
        "Orchestrator ready"
    );
    Ok(Orchestrator::new(
        store,
        provider,
        registry,
        compression_settings(config),
        OrchestratorSettings::from_config(config),
    ))
}
