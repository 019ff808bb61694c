use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};

use crate::error::{ConfabError, StoreError, ToolError};
use crate::message::Message;
use crate::schema::ToolSchema;
use crate::types::{ContextWindow, ToolCallProposal};

/// One item of a model's output stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// Append-only text delta.
    Delta(String),
    /// The model wants a tool run. Always the last item of the stream.
    ToolCall(ToolCallProposal),
}

/// Lazy sequence of model output.
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelEvent, ConfabError>> + Send>>;

/// Tool descriptor handed to the provider so it can advertise functions.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
}

/// Input to a single generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: Option<String>,
    pub context: ContextWindow,
    /// Tools the model may call. Empty when a tool outcome was withheld.
    pub tools: Vec<ToolSpec>,
}

/// Text generation and summarization collaborator.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai", "mock").
    fn name(&self) -> &str;

    /// Start a streaming generation over the given context.
    async fn generate(&self, request: GenerationRequest) -> Result<ModelStream, ConfabError>;

    /// Produce a single summary text for the given messages.
    async fn summarize(&self, messages: &[Message]) -> Result<String, ConfabError>;
}

/// Durable append-only message log, keyed by session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn append(&self, session_id: &str, message: &Message) -> Result<(), StoreError>;

    /// All messages of the session, oldest first.
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Explicit external clear. Never called by the orchestrator on its own.
    async fn clear(&self, session_id: &str) -> Result<usize, StoreError>;
}

/// A capability the model can invoke.
///
/// Executors receive only their arguments; they never see or mutate session state.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name of the tool (e.g., "add").
    fn name(&self) -> &str;

    /// Description for the model prompt.
    fn description(&self) -> &str;

    fn schema(&self) -> ToolSchema;

    /// Run with arguments already validated against `schema()`.
    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError>;
}
