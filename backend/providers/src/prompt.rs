//! Prompt text shared by provider adapters.

use confab_core::{Message, Role};

/// Render history as plain `User:` / `Assistant:` / `Tool (name):` lines.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .filter_map(|m| {
            let tool = m.tool_name().unwrap_or("unknown");
            match m.role {
                Role::User => Some(format!("User: {}", m.content)),
                Role::Assistant => Some(format!("Assistant: {}", m.content)),
                Role::ToolCall => Some(format!("Tool ({tool}): {}", m.content)),
                Role::ToolResult => Some(format!("Tool ({tool}) result: {}", m.content)),
                Role::System if m.is_summary() => Some(m.content.clone()),
                Role::System => None,
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Single-turn prompt asking for a summary of `messages`.
pub fn summary_prompt(messages: &[Message]) -> String {
    format!(
        "Please summarize the following conversation history in a concise manner, \
preserving key context and information:\n\n{}\n\nSummary:",
        render_transcript(messages)
    )
}
