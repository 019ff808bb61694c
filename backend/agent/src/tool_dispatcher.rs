//! Dispatcher for validated tool calls.
//!
//! Every failure, including a panicking executor, comes back as an error
//! payload for a `tool_result`; nothing propagates to the turn.

use serde_json::{Value, json};
use tracing::{debug, warn};

use confab_core::ToolError;
use confab_tools::ValidatedCall;

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// The tool's value, or `{"error": "..."}`.
    pub value: Value,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(value: Value) -> Self {
        Self {
            value,
            is_error: false,
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            value: json!({ "error": message.to_string() }),
            is_error: true,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ToolDispatcher;

impl ToolDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Run the executor on its own task. The task is not tied to the caller's
    /// connection, so a started call always runs to completion.
    pub async fn dispatch(&self, call: &ValidatedCall) -> ToolOutcome {
        let tool = call.tool.clone();
        let args = call.proposal.arguments.clone();
        let name = call.proposal.name.clone();

        let joined = tokio::spawn(async move { tool.execute(&args).await }).await;
        let result = joined.unwrap_or_else(|e| Err(ToolError::Execution(e.to_string())));

        match result {
            Ok(value) => {
                debug!(tool = %name, result = %value, "Tool executed");
                ToolOutcome::ok(value)
            }
            Err(ToolError::Domain(message)) => {
                debug!(tool = %name, %message, "Tool reported a domain error");
                ToolOutcome::error(message)
            }
            Err(err) => {
                warn!(tool = %name, error = %err, "Tool execution failed");
                ToolOutcome::error(err)
            }
        }
    }
}
