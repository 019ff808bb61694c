//! Confab conversation orchestration.
//!
//! Sessions, the confirmation gate, ordered event delivery and the turn state
//! machine that drives the model, the tools and the context assembler.

pub mod bootstrap;
pub mod coordinator;
pub mod gate;
pub mod orchestrator;
pub mod session;
pub mod tool_dispatcher;

#[cfg(test)]
mod scenarios;

pub use bootstrap::build_orchestrator;
pub use coordinator::{EventStream, SequencedEvent, StreamCoordinator};
pub use gate::{ConfirmationPolicy, GateState, Resolution};
pub use orchestrator::{
    ConfirmationAck, Orchestrator, OrchestratorSettings, SessionStats, ToolCallRecord,
    TurnHandle, TurnSummary,
};
pub use session::{Session, SessionRegistry};
pub use tool_dispatcher::{ToolDispatcher, ToolOutcome};
