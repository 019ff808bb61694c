use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::message::{total_chars, Message};
use crate::schema::ToolSchema;

/// A model-selected tool invocation awaiting validation and confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallProposal {
    /// Provider-assigned call identifier, or a generated one.
    pub call_id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
    /// Model confidence in the proposal, 0.0 to 1.0.
    pub confidence: f32,
    /// Filled in by the registry once the proposal is matched.
    #[serde(default)]
    pub schema: Option<ToolSchema>,
}

impl ToolCallProposal {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            call_id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
            confidence: 1.0,
            schema: None,
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn args_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// A proposal parked on a session while awaiting out-of-band confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingToolCall {
    pub id: Uuid,
    pub proposal: ToolCallProposal,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub timeout_secs: u64,
}

impl PendingToolCall {
    pub fn new(proposal: ToolCallProposal, description: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            proposal,
            description: description.into(),
            created_at: Utc::now(),
            timeout_secs,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.timeout_secs as i64)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }
}

/// The message sequence sent to the model for one turn. Never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextWindow {
    pub messages: Vec<Message>,
    /// Older history was replaced by a synthetic summary message.
    pub compressed: bool,
    /// Summarization failed and the oldest messages were truncated instead.
    pub degraded: bool,
    /// Character total of the raw log the window was built from.
    pub source_chars: usize,
}

impl ContextWindow {
    /// A window that is the raw log, unmodified.
    pub fn verbatim(messages: Vec<Message>) -> Self {
        let source_chars = total_chars(&messages);
        Self {
            messages,
            compressed: false,
            degraded: false,
            source_chars,
        }
    }

    pub fn total_chars(&self) -> usize {
        total_chars(&self.messages)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Orchestration state of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    #[default]
    Idle,
    ContextBuilding,
    ModelStreaming,
    ToolDetected,
    ConfirmationPending,
    ToolExecuting,
    Complete,
    Error,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Complete | TurnState::Error)
    }

    /// Legal edges of the orchestration state machine. `Error` is reachable
    /// from every non-terminal state except `Idle`; a cancelled turn drops
    /// straight back to `Idle`.
    pub fn can_transition_to(&self, next: TurnState) -> bool {
        use TurnState::*;
        match (*self, next) {
            (Idle, ContextBuilding) => true,
            (ContextBuilding, ModelStreaming) => true,
            (ModelStreaming, ToolDetected | Complete) => true,
            (ToolDetected, ConfirmationPending | ToolExecuting | ModelStreaming) => true,
            (ConfirmationPending, ToolExecuting | ContextBuilding) => true,
            (ToolExecuting, ModelStreaming | ContextBuilding) => true,
            (Complete | Error, Idle) => true,
            (ContextBuilding | ModelStreaming | ToolDetected | ToolExecuting, Idle) => true,
            (from, Error) => !from.is_terminal() && from != Idle,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::ContextBuilding => "context_building",
            TurnState::ModelStreaming => "model_streaming",
            TurnState::ToolDetected => "tool_detected",
            TurnState::ConfirmationPending => "confirmation_pending",
            TurnState::ToolExecuting => "tool_executing",
            TurnState::Complete => "complete",
            TurnState::Error => "error",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
