//! Deterministic offline provider.
//!
//! Recognises simple two-operand arithmetic in the latest user message and
//! proposes the matching tool; after a tool result it reports the value in
//! plain text. Useful for demos and end-to-end tests without network access.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};

use confab_core::{
    ConfabError, GenerationRequest, Message, ModelEvent, ModelProvider, ModelStream, Role,
    ToolCallProposal,
};

/// Confidence attached to every proposal the mock makes.
pub const MOCK_CONFIDENCE: f32 = 0.9;

const NUM: &str = r"(-?\d+(?:\.\d+)?)";

static INFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"{NUM}\s*([+\-*/x×÷])\s*{NUM}")).expect("infix pattern is valid")
});
static DIVIDE_BY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)divide\s+{NUM}\s+by\s+{NUM}")).expect("divide pattern is valid")
});
static SUBTRACT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)subtract\s+{NUM}\s+from\s+{NUM}")).expect("subtract pattern is valid")
});
static MULTIPLY_BY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)multiply\s+{NUM}\s+(?:by|and|with)\s+{NUM}"))
        .expect("multiply pattern is valid")
});
static ADD_AND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)add\s+{NUM}\s+(?:and|to|plus)\s+{NUM}")).expect("add pattern is valid")
});

const HELP_TEXT: &str = "I can add, subtract, multiply and divide two numbers for you. \
Try asking something like \"What is 15 + 25?\"";
const DECLINED_TEXT: &str =
    "Okay, I won't run that calculation. Let me know if you'd like to try something else.";

pub struct MockProvider {
    name: String,
    delay: Option<Duration>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            delay: None,
        }
    }

    /// Sleep before each streamed item, to simulate a slow model.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn respond(&self, request: &GenerationRequest) -> Vec<ModelEvent> {
        let Some(last) = request.context.last() else {
            return words(HELP_TEXT);
        };
        match last.role {
            Role::ToolResult => words(&describe_result(last)),
            Role::ToolCall => words(DECLINED_TEXT),
            Role::User => match parse_arithmetic(&last.content) {
                Some((tool, a, b)) if request.tools.iter().any(|t| t.name == tool) => {
                    let mut args = Map::new();
                    args.insert("a".to_string(), a);
                    args.insert("b".to_string(), b);
                    vec![ModelEvent::ToolCall(
                        ToolCallProposal::new(tool, args).with_confidence(MOCK_CONFIDENCE),
                    )]
                }
                Some(_) => words(DECLINED_TEXT),
                None => words(HELP_TEXT),
            },
            Role::Assistant | Role::System => words(HELP_TEXT),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Split text into word deltas whose concatenation is the original text.
fn words(text: &str) -> Vec<ModelEvent> {
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch == ' ' && !current.is_empty() {
            out.push(ModelEvent::Delta(std::mem::take(&mut current)));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        out.push(ModelEvent::Delta(current));
    }
    out
}

fn describe_result(result: &Message) -> String {
    if result.is_error() {
        let reason = serde_json::from_str::<Value>(&result.content)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| "the tool reported an error".to_string());
        format!("I couldn't compute that: {reason}.")
    } else {
        format!("The result is {}.", result.content)
    }
}

fn number(text: &str) -> Option<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::from(i));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// Tool name and operands for an arithmetic request, if one is recognised.
pub fn parse_arithmetic(text: &str) -> Option<(&'static str, Value, Value)> {
    let worded: [(&Lazy<Regex>, &'static str, bool); 4] = [
        (&DIVIDE_BY, "divide", false),
        (&SUBTRACT_FROM, "subtract", true),
        (&MULTIPLY_BY, "multiply", false),
        (&ADD_AND, "add", false),
    ];
    for (pattern, tool, swapped) in worded {
        if let Some(caps) = pattern.captures(text) {
            let (first, second) = (number(&caps[1])?, number(&caps[2])?);
            return Some(if swapped {
                (tool, second, first)
            } else {
                (tool, first, second)
            });
        }
    }

    let caps = INFIX.captures(text)?;
    let tool = match &caps[2] {
        "+" => "add",
        "-" => "subtract",
        "*" | "x" | "×" => "multiply",
        "/" | "÷" => "divide",
        _ => return None,
    };
    Some((tool, number(&caps[1])?, number(&caps[3])?))
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerationRequest) -> Result<ModelStream, ConfabError> {
        let events = self.respond(&request);
        let stream = futures::stream::iter(events.into_iter().map(Ok::<_, ConfabError>));
        match self.delay {
            Some(delay) => Ok(Box::pin(stream.then(move |event| async move {
                tokio::time::sleep(delay).await;
                event
            }))),
            None => Ok(Box::pin(stream)),
        }
    }

    async fn summarize(&self, messages: &[Message]) -> Result<String, ConfabError> {
        let asked: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect();
        let mut summary = format!(
            "{} earlier messages. The user asked: {}",
            messages.len(),
            asked.join("; ")
        );
        if summary.chars().count() > 400 {
            summary = summary.chars().take(400).collect::<String>() + "...";
        }
        Ok(summary)
    }
}
