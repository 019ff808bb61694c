use thiserror::Error;

/// Top-level error type for the Confab conversation engine.
#[derive(Debug, Error)]
pub enum ConfabError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("model provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error(transparent)]
    Persistence(#[from] StoreError),

    #[error("session {session_id} is busy: {reason}")]
    Busy { session_id: String, reason: String },

    #[error("no pending tool call for session {0}")]
    StaleConfirmation(String),

    #[error("no live session {0}")]
    UnknownSession(String),

    #[error("confirmation window for session {0} has expired")]
    ConfirmationExpired(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConfabError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn busy(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Busy {
            session_id: session_id.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Provider { .. } => "provider_error",
            Self::Persistence(_) => "persistence_error",
            Self::Busy { .. } => "busy",
            Self::StaleConfirmation(_) => "stale_confirmation",
            Self::UnknownSession(_) => "session_not_found",
            Self::ConfirmationExpired(_) => "confirmation_expired",
            Self::Config(_) => "config_error",
            Self::Other(_) => "internal_error",
        }
    }
}

/// Failure reported by the session store. Fatal for the current turn.
#[derive(Debug, Error)]
#[error("session store error: {message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Tool arguments did not satisfy the tool's parameter schema.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid call to '{tool}': {message}")]
pub struct ValidationError {
    pub tool: String,
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            field: None,
            message: message.into(),
        }
    }

    pub fn field(
        tool: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

/// Failure raised by a tool executor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    /// The operation is undefined for the given input (e.g. division by zero).
    #[error("{0}")]
    Domain(String),

    /// The executor itself failed (panicked, was cancelled, or errored).
    #[error("tool execution failed: {0}")]
    Execution(String),
}
