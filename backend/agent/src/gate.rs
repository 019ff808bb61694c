//! Confirmation gate: decides whether a validated tool proposal must wait for
//! an out-of-band decision, and how that decision resolves.
//!
//! Per proposal the gate moves `None -> Detected -> AwaitingConfirmation` and
//! ends in one of `Approved`, `Rejected` or `TimedOut`. A timeout is handled
//! exactly like a rejection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use confab_config::{ConfirmationConfig, ConfirmationPolicyKind};
use confab_core::ToolCallProposal;

/// Status labels written into the `status` metadata of a persisted tool call.
pub mod status {
    /// Executed without asking.
    pub const AUTO: &str = "auto";
    pub const APPROVED: &str = "approved";
    pub const REJECTED: &str = "rejected";
    pub const TIMED_OUT: &str = "timed_out";
    /// Failed schema validation; never executed.
    pub const INVALID: &str = "invalid";
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ConfirmationPolicy {
    #[default]
    Always,
    Never,
    /// Wait only when the model's confidence is below the threshold.
    BelowConfidence(f32),
}

impl ConfirmationPolicy {
    pub fn from_config(config: &ConfirmationConfig) -> Self {
        match config.policy {
            ConfirmationPolicyKind::Always => Self::Always,
            ConfirmationPolicyKind::Never => Self::Never,
            ConfirmationPolicyKind::BelowConfidence => {
                Self::BelowConfidence(config.confidence_threshold)
            }
        }
    }

    pub fn requires_confirmation(&self, proposal: &ToolCallProposal) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::BelowConfidence(threshold) => proposal.confidence < *threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    None,
    Detected,
    AwaitingConfirmation,
    Approved,
    Rejected,
    TimedOut,
}

/// How a parked proposal was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Carries the arguments to dispatch with, edits already applied.
    Approved(Map<String, Value>),
    Rejected,
    TimedOut,
}

impl Resolution {
    pub fn state(&self) -> GateState {
        match self {
            Self::Approved(_) => GateState::Approved,
            Self::Rejected => GateState::Rejected,
            Self::TimedOut => GateState::TimedOut,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Approved(_) => status::APPROVED,
            Self::Rejected => status::REJECTED,
            Self::TimedOut => status::TIMED_OUT,
        }
    }
}

/// Apply the confirming party's edits over the proposed arguments.
/// Keys present in `edits` win; keys absent keep the proposed value.
pub fn merge_args(proposed: &Map<String, Value>, edits: Map<String, Value>) -> Map<String, Value> {
    let mut merged = proposed.clone();
    merged.extend(edits);
    merged
}
