//! Config validation: range and consistency checks with user-friendly messages.

use crate::schema::{ConfabConfig, ConfirmationPolicyKind};
use thiserror::Error;

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &ConfabConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_server(config, &mut report);
    validate_llm(config, &mut report);
    validate_memory(config, &mut report);
    validate_confirmation(config, &mut report);
    validate_agent(config, &mut report);
    report
}

fn validate_server(config: &ConfabConfig, report: &mut ValidationReport) {
    let port = config.server.port;
    if port == 0 {
        report.error("server.port", "port must be > 0");
    } else if port < 1024 && port != 80 && port != 443 {
        report.warn(
            "server.port",
            format!("Port {port} requires elevated privileges; consider using a port >= 1024"),
        );
    }
}

fn validate_llm(config: &ConfabConfig, report: &mut ValidationReport) {
    let llm = &config.llm;
    if llm.model.trim().is_empty() {
        report.error("llm.model", "model cannot be empty");
    }
    if llm.provider.requires_api_key()
        && llm.api_key.as_deref().map(str::is_empty).unwrap_or(true)
    {
        report.error(
            "llm.api_key",
            format!("provider '{}' requires an api_key", llm.provider.as_str()),
        );
    }
    if !(0.0..=2.0).contains(&llm.temperature) {
        report.error("llm.temperature", "temperature must be between 0.0 and 2.0");
    }
    if llm.max_tokens == 0 {
        report.error("llm.max_tokens", "max_tokens must be >= 1");
    }
    if llm.timeout_secs == 0 {
        report.error("llm.timeout_secs", "timeout_secs must be >= 1");
    }
}

fn validate_memory(config: &ConfabConfig, report: &mut ValidationReport) {
    let memory = &config.memory;
    if memory.max_characters == 0 {
        report.error("memory.max_characters", "max_characters must be >= 1");
    }
    if memory.recent_characters >= memory.max_characters {
        report.error(
            "memory.recent_characters",
            "recent_characters must be smaller than max_characters",
        );
    } else if memory.recent_characters < memory.max_characters / 4 {
        report.warn(
            "memory.recent_characters",
            "recent budget is small; compressed turns will keep very little verbatim history",
        );
    }
}

fn validate_confirmation(config: &ConfabConfig, report: &mut ValidationReport) {
    let gate = &config.confirmation;
    if gate.timeout_secs == 0 {
        report.error("confirmation.timeout_secs", "timeout_secs must be >= 1");
    }
    if !(0.0..=1.0).contains(&gate.confidence_threshold) {
        report.error(
            "confirmation.confidence_threshold",
            "confidence_threshold must be between 0.0 and 1.0",
        );
    }
    if gate.policy == ConfirmationPolicyKind::Never {
        report.warn("confirmation.policy", "tool calls will run without confirmation");
    }
}

fn validate_agent(config: &ConfabConfig, report: &mut ValidationReport) {
    if config.agent.max_steps == 0 {
        report.error("agent.max_steps", "max_steps must be >= 1");
    }
}
