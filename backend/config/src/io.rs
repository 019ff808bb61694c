//! Config file discovery and loading.

use crate::env::resolve_env_vars;
use crate::schema::ConfabConfig;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Default config file name within the config directory.
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Env var that points directly at a config file.
pub const CONFIG_PATH_ENV: &str = "CONFAB_CONFIG";

/// Resolve the Confab config directory (`~/.confab/`).
pub fn config_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".confab"),
        None => PathBuf::from(".confab"),
    }
}

/// Resolve the config file to load.
/// Priority: explicit path > `CONFAB_CONFIG` env > `~/.confab/config.yaml`.
pub fn config_file_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    config_dir().join(CONFIG_FILE_NAME)
}

/// Load and parse the config from disk, resolving `${VAR}` references.
///
/// Returns `Ok(Default::default())` if the file doesn't exist (first run).
pub async fn load_config(path: &Path) -> Result<ConfabConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(ConfabConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&raw)
        .with_context(|| format!("Failed to load config at: {}", path.display()))?;

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Parse YAML text into a config, substituting env vars first.
pub fn parse_config(raw: &str) -> Result<ConfabConfig> {
    if raw.trim().is_empty() {
        return Ok(ConfabConfig::default());
    }
    let value: Value = serde_yaml::from_str(raw).context("Failed to parse config YAML")?;
    let value = resolve_env_vars(&value).context("Failed to resolve env vars in config")?;
    serde_json::from_value(value).context("Config does not match the expected schema")
}
