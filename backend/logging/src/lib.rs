//! Telemetry and structured logging components for Confab.
//!
//! Handles subscriber setup (console + rolling NDJSON file) and log redaction.

pub mod logger;
pub mod redact;

pub use logger::{ConsoleOutput, init_logger};
pub use redact::redact_sensitive_data;
