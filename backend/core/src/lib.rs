pub mod error;
pub mod event;
pub mod message;
pub mod schema;
pub mod traits;
pub mod types;

pub use error::{ConfabError, StoreError, ToolError, ValidationError};
pub use event::StreamEvent;
pub use message::{total_chars, Message, Role};
pub use schema::{ParamKind, ParamSpec, ToolSchema};
pub use traits::{
    GenerationRequest, ModelEvent, ModelProvider, ModelStream, SessionStore, Tool, ToolSpec,
};
pub use types::{ContextWindow, PendingToolCall, ToolCallProposal, TurnState};
