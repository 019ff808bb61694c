use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who produced a message in the session log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolCall,
    ToolResult,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolCall => "tool_call",
            Role::ToolResult => "tool_result",
            Role::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool_call" => Some(Role::ToolCall),
            "tool_result" => Some(Role::ToolResult),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable entry of a session's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Number of Unicode scalar values in `content`.
    pub char_count: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Metadata keys written by the orchestrator.
pub mod meta {
    pub const TOOL_NAME: &str = "tool_name";
    pub const TOOL_ARGS: &str = "tool_args";
    pub const CALL_ID: &str = "call_id";
    pub const STATUS: &str = "status";
    pub const IS_ERROR: &str = "is_error";
    pub const SUMMARY: &str = "summary";
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            role,
            char_count: content.chars().count(),
            content,
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Record of a proposed tool invocation and how the gate resolved it.
    pub fn tool_call(
        name: &str,
        call_id: &str,
        args: &Map<String, Value>,
        status: &str,
    ) -> Self {
        let rendered = Value::Object(args.clone()).to_string();
        Self::new(Role::ToolCall, format!("{name}({rendered})"))
            .with_meta(meta::TOOL_NAME, Value::String(name.to_string()))
            .with_meta(meta::CALL_ID, Value::String(call_id.to_string()))
            .with_meta(meta::TOOL_ARGS, Value::Object(args.clone()))
            .with_meta(meta::STATUS, Value::String(status.to_string()))
    }

    pub fn tool_result(name: &str, call_id: &str, result: &Value, is_error: bool) -> Self {
        Self::new(Role::ToolResult, result.to_string())
            .with_meta(meta::TOOL_NAME, Value::String(name.to_string()))
            .with_meta(meta::CALL_ID, Value::String(call_id.to_string()))
            .with_meta(meta::IS_ERROR, Value::Bool(is_error))
    }

    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.meta_str(meta::TOOL_NAME)
    }

    pub fn call_id(&self) -> Option<&str> {
        self.meta_str(meta::CALL_ID)
    }

    pub fn is_error(&self) -> bool {
        self.metadata
            .get(meta::IS_ERROR)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_summary(&self) -> bool {
        self.metadata
            .get(meta::SUMMARY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Sum of character counts, the quantity that drives compression.
pub fn total_chars(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.char_count).sum()
}
