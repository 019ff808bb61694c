use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One frame of the per-turn output protocol.
///
/// Serialized as a flat object tagged by `type`, e.g.
/// `{"type":"message","session_id":"s1","content":"4","is_complete":false}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First frame of every turn.
    SessionInfo {
        session_id: String,
        compressed: bool,
        degraded: bool,
    },
    /// Incremental text delta. `is_complete` marks the end of the textual answer.
    Message {
        session_id: String,
        content: String,
        is_complete: bool,
    },
    ToolCall {
        session_id: String,
        name: String,
        args: Value,
        awaiting_confirmation: bool,
    },
    /// `result` is the tool's value, or `{"error": "..."}` when `is_error`.
    ToolResult {
        session_id: String,
        name: String,
        result: Value,
        is_error: bool,
    },
    /// `degraded` is set when any context built during the turn had to be
    /// truncated because summarization failed.
    Complete {
        session_id: String,
        #[serde(default)]
        degraded: bool,
    },
    StreamEnd {
        session_id: String,
    },
    Error {
        session_id: String,
        code: String,
        content: String,
    },
}

impl StreamEvent {
    pub fn session_id(&self) -> &str {
        match self {
            StreamEvent::SessionInfo { session_id, .. }
            | StreamEvent::Message { session_id, .. }
            | StreamEvent::ToolCall { session_id, .. }
            | StreamEvent::ToolResult { session_id, .. }
            | StreamEvent::Complete { session_id, .. }
            | StreamEvent::StreamEnd { session_id }
            | StreamEvent::Error { session_id, .. } => session_id,
        }
    }

    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::SessionInfo { .. } => "session_info",
            StreamEvent::Message { .. } => "message",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::Complete { .. } => "complete",
            StreamEvent::StreamEnd { .. } => "stream_end",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// Whether the frame closes the subscriber's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::StreamEnd { .. } | StreamEvent::Error { .. })
    }
}
