//! Declarative parameter schemas for tools.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ValidationError;

/// JSON type a parameter must carry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Number,
    Integer,
    String,
    Boolean,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Number => "number",
            ParamKind::Integer => "integer",
            ParamKind::String => "string",
            ParamKind::Boolean => "boolean",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::Number => value.is_number(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::String => value.is_string(),
            ParamKind::Boolean => value.is_boolean(),
        }
    }
}

/// One named parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    pub required: bool,
    pub description: String,
}

/// The full parameter schema a proposal is matched against.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolSchema {
    pub params: Vec<ParamSpec>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        });
        self
    }

    pub fn optional(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
        });
        self
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// JSON Schema object, as model providers expect for function definitions.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            properties.insert(
                p.name.clone(),
                json!({ "type": p.kind.as_str(), "description": p.description }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check `args` against the schema: every required field present, every
    /// field known and of the declared type.
    pub fn validate(&self, tool: &str, args: &Map<String, Value>) -> Result<(), ValidationError> {
        for p in &self.params {
            match args.get(&p.name) {
                None | Some(Value::Null) if p.required => {
                    return Err(ValidationError::field(
                        tool,
                        &p.name,
                        format!("missing required field '{}'", p.name),
                    ));
                }
                Some(value) if !value.is_null() && !p.kind.accepts(value) => {
                    return Err(ValidationError::field(
                        tool,
                        &p.name,
                        format!("field '{}' must be of type {}", p.name, p.kind.as_str()),
                    ));
                }
                _ => {}
            }
        }
        if let Some(unknown) = args.keys().find(|k| self.param(k).is_none()) {
            return Err(ValidationError::field(
                tool,
                unknown.as_str(),
                format!("unknown field '{unknown}'"),
            ));
        }
        Ok(())
    }
}
