//! Basic arithmetic tools.

use std::sync::Arc;

use async_trait::async_trait;
use confab_core::{ParamKind, Tool, ToolError, ToolSchema};
use serde_json::{Map, Value};
use tracing::info;

/// All arithmetic tools, in registration order.
pub fn math_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(AddTool),
        Arc::new(SubtractTool),
        Arc::new(MultiplyTool),
        Arc::new(DivideTool),
    ]
}

fn binary_schema(first: &str, second: &str) -> ToolSchema {
    ToolSchema::new()
        .required("a", ParamKind::Number, first)
        .required("b", ParamKind::Number, second)
}

fn operands(args: &Map<String, Value>) -> Result<(f64, f64), ToolError> {
    let get = |key: &str| {
        args.get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| ToolError::Execution(format!("argument '{key}' is not a number")))
    };
    Ok((get("a")?, get("b")?))
}

/// Integral results are reported as integers so `15 + 25` yields `40`, not `40.0`.
fn number(value: f64) -> Result<Value, ToolError> {
    if !value.is_finite() {
        return Err(ToolError::Domain("Result is not a finite number".to_string()));
    }
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        Ok(Value::from(value as i64))
    } else {
        Ok(Value::from(value))
    }
}

pub struct AddTool;

#[async_trait]
impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two numbers together."
    }

    fn schema(&self) -> ToolSchema {
        binary_schema("First number", "Second number")
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let (a, b) = operands(args)?;
        let result = a + b;
        info!(a, b, result, "Math tool: add");
        number(result)
    }
}

pub struct SubtractTool;

#[async_trait]
impl Tool for SubtractTool {
    fn name(&self) -> &str {
        "subtract"
    }

    fn description(&self) -> &str {
        "Subtract the second number from the first."
    }

    fn schema(&self) -> ToolSchema {
        binary_schema("First number (minuend)", "Second number (subtrahend)")
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let (a, b) = operands(args)?;
        let result = a - b;
        info!(a, b, result, "Math tool: subtract");
        number(result)
    }
}

pub struct MultiplyTool;

#[async_trait]
impl Tool for MultiplyTool {
    fn name(&self) -> &str {
        "multiply"
    }

    fn description(&self) -> &str {
        "Multiply two numbers together."
    }

    fn schema(&self) -> ToolSchema {
        binary_schema("First number", "Second number")
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let (a, b) = operands(args)?;
        let result = a * b;
        info!(a, b, result, "Math tool: multiply");
        number(result)
    }
}

pub struct DivideTool;

#[async_trait]
impl Tool for DivideTool {
    fn name(&self) -> &str {
        "divide"
    }

    fn description(&self) -> &str {
        "Divide the first number by the second."
    }

    fn schema(&self) -> ToolSchema {
        binary_schema("First number (dividend)", "Second number (divisor)")
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let (a, b) = operands(args)?;
        if b == 0.0 {
            tracing::warn!(a, b, "Math tool: divide by zero");
            return Err(ToolError::Domain("Cannot divide by zero".to_string()));
        }
        let result = a / b;
        info!(a, b, result, "Math tool: divide");
        number(result)
    }
}
