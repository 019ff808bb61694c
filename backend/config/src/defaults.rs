//! Default values for every config section.

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;

/// Compression threshold in characters.
pub const DEFAULT_MAX_CHARACTERS: usize = 3200;
pub const DEFAULT_RECENT_CHARACTERS: usize = 1600;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.8;
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 15;

pub const DEFAULT_DB_PATH: &str = "confab.db";
pub const IN_MEMORY_DB: &str = ":memory:";

pub const DEFAULT_MAX_STEPS: usize = 10;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. \
Use the available math tools for any arithmetic and report the tool's result exactly. \
If a tool call is declined, answer without claiming a computed result.";

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_DIR: &str = "logs";
