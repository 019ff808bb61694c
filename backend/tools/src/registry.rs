use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use confab_core::{Tool, ToolCallProposal, ToolSchema, ToolSpec, ValidationError};

/// Static table of invocable tools, assembled once at startup.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

/// Serializable view of a registered tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: ToolSchema,
}

/// A proposal whose arguments passed schema validation, bound to its executor.
#[derive(Clone)]
pub struct ValidatedCall {
    pub proposal: ToolCallProposal,
    pub tool: Arc<dyn Tool>,
}

impl std::fmt::Debug for ValidatedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedCall")
            .field("proposal", &self.proposal)
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Registry holding the built-in arithmetic tools.
    pub fn builtin() -> Self {
        Self::from_tools(crate::math::math_tools())
    }

    pub fn from_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.schema(),
            })
            .collect()
    }

    /// Tool definitions advertised to the model.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                schema: t.schema(),
            })
            .collect()
    }

    /// Validate a proposal against the named tool's schema.
    ///
    /// On success the proposal carries the schema it was matched against.
    pub fn match_proposal(
        &self,
        mut proposal: ToolCallProposal,
    ) -> Result<ValidatedCall, ValidationError> {
        let tool = self
            .get(&proposal.name)
            .ok_or_else(|| ValidationError::new(&proposal.name, format!("unknown tool '{}'", proposal.name)))?;
        let schema = tool.schema();
        schema.validate(&proposal.name, &proposal.arguments)?;
        debug!(tool = %proposal.name, call_id = %proposal.call_id, "Tool proposal matched schema");
        proposal.schema = Some(schema);
        Ok(ValidatedCall { proposal, tool })
    }
}
