//! `confab-config`: Confab runtime configuration management.
//!
//! Provides:
//! - Typed config schema with defaults for every section
//! - YAML loading with `${ENV_VAR}` substitution
//! - Config redaction for safe display
//! - Range and consistency validation

pub mod defaults;
pub mod env;
pub mod io;
pub mod redact;
pub mod schema;
pub mod validation;

pub use env::{resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config, parse_config, CONFIG_PATH_ENV};
pub use redact::redacted;
pub use schema::{
    AgentConfig, ConfabConfig, ConfirmationConfig, ConfirmationPolicyKind, LlmConfig,
    LoggingConfig, MemoryConfig, ProviderKind, ServerConfig, StorageConfig,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Result};
use std::path::Path;

/// Load and validate a config file.
///
/// This is the main entry point for loading a config at runtime. Warnings
/// are logged; any validation error aborts with the full list.
pub async fn load_and_prepare(path: &Path) -> Result<ConfabConfig> {
    let config = load_config(path).await?;

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    if !report.is_valid() {
        let details: Vec<String> = report.errors.iter().map(ToString::to_string).collect();
        bail!("Invalid configuration:\n  {}", details.join("\n  "));
    }

    Ok(config)
}
