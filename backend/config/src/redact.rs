//! Safe-to-share config snapshots with secrets masked.

use crate::schema::ConfabConfig;

/// Copy of `config` with the API key reduced to a short hint.
pub fn redacted(config: &ConfabConfig) -> ConfabConfig {
    let mut out = config.clone();
    out.llm.api_key = config.llm.api_key.as_deref().map(mask);
    out
}

fn mask(secret: &str) -> String {
    if secret.chars().count() > 8 {
        format!("{}***", secret.chars().take(4).collect::<String>())
    } else {
        "***".to_string()
    }
}
