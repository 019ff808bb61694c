use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use confab_core::message::meta;
use confab_core::{
    ConfabError, GenerationRequest, Message, ModelProvider, ModelStream, Role, ToolSpec,
};
use confab_logging::redact_sensitive_data;

use crate::prompt::summary_prompt;
use crate::sse::decode_stream;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Chat-completions provider for any OpenAI-compatible endpoint
/// (OpenAI, OpenRouter, Ollama's `/v1`).
pub struct OpenAiCompatProvider {
    name: String,
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompatProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
            temperature: 0.2,
            max_tokens: 1024,
        }
    }

    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new("openai", OPENAI_BASE_URL, model).with_api_key(api_key)
    }

    pub fn openrouter(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new("openrouter", OPENROUTER_BASE_URL, model).with_api_key(api_key)
    }

    pub fn ollama(model: impl Into<String>) -> Self {
        Self::new("ollama", OLLAMA_BASE_URL, model)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Request timeout for every call, surfaced as a provider error.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        match Client::builder().timeout(timeout).build() {
            Ok(client) => self.client = client,
            Err(e) => warn!(provider = %self.name, error = %e, "Falling back to default HTTP client"),
        }
        self
    }

    fn error(&self, message: impl AsRef<str>) -> ConfabError {
        ConfabError::provider(&self.name, redact_sensitive_data(message.as_ref()))
    }

    async fn post(&self, body: &ChatRequest) -> Result<reqwest::Response, ConfabError> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.error(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = format!("{} returned {status}: {error_body}", self.name);
            warn!(provider = %self.name, %status, body = %redact_sensitive_data(&error_body), "Provider call rejected");
            return Err(self.error(message));
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

fn tool_definition(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.schema.to_json_schema(),
        }
    })
}

/// Map the session context onto chat-completion messages.
///
/// A tool call is sent as a structured `tool_calls` entry only when its result
/// is also present; declined calls are described in text so the model knows
/// the tool did not run.
fn to_chat_messages(system_prompt: Option<&str>, context: &[Message]) -> Vec<ChatMessage> {
    let answered: HashSet<&str> = context
        .iter()
        .filter(|m| m.role == Role::ToolResult)
        .filter_map(Message::call_id)
        .collect();
    let mut structured: HashSet<&str> = HashSet::new();

    let mut out = Vec::with_capacity(context.len() + 1);
    if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
        out.push(ChatMessage::text("system", prompt));
    }

    for message in context {
        match message.role {
            Role::User => out.push(ChatMessage::text("user", &message.content)),
            Role::Assistant => out.push(ChatMessage::text("assistant", &message.content)),
            Role::System => out.push(ChatMessage::text("system", &message.content)),
            Role::ToolCall => {
                let name = message.tool_name().unwrap_or("unknown");
                match message.call_id().filter(|id| answered.contains(id)) {
                    Some(call_id) => {
                        structured.insert(call_id);
                        let args = message
                            .metadata
                            .get(meta::TOOL_ARGS)
                            .cloned()
                            .unwrap_or_else(|| json!({}));
                        out.push(ChatMessage {
                            role: "assistant".to_string(),
                            content: None,
                            tool_calls: Some(vec![json!({
                                "id": call_id,
                                "type": "function",
                                "function": {"name": name, "arguments": args.to_string()},
                            })]),
                            tool_call_id: None,
                        });
                    }
                    None => {
                        let status = message.meta_str(meta::STATUS).unwrap_or("rejected");
                        out.push(ChatMessage::text(
                            "system",
                            format!(
                                "The proposed tool call {} was not executed ({status}). No tool result is available.",
                                message.content
                            ),
                        ));
                    }
                }
            }
            Role::ToolResult => match message.call_id().filter(|id| structured.contains(id)) {
                Some(call_id) => out.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(message.content.clone()),
                    tool_calls: None,
                    tool_call_id: Some(call_id.to_string()),
                }),
                None => out.push(ChatMessage::text(
                    "system",
                    format!(
                        "Tool {} returned: {}",
                        message.tool_name().unwrap_or("unknown"),
                        message.content
                    ),
                )),
            },
        }
    }
    out
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerationRequest) -> Result<ModelStream, ConfabError> {
        let tools = (!request.tools.is_empty())
            .then(|| request.tools.iter().map(tool_definition).collect());
        let body = ChatRequest {
            model: self.model.clone(),
            messages: to_chat_messages(request.system_prompt.as_deref(), &request.context.messages),
            stream: true,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools,
        };

        debug!(
            provider = %self.name,
            model = %self.model,
            messages = body.messages.len(),
            tools = request.tools.len(),
            "Starting streaming generation"
        );

        let response = self.post(&body).await?;
        Ok(decode_stream(self.name.clone(), response.bytes_stream()))
    }

    async fn summarize(&self, messages: &[Message]) -> Result<String, ConfabError> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::text("user", summary_prompt(messages))],
            stream: false,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: None,
        };

        debug!(provider = %self.name, messages = messages.len(), "Requesting summary");

        let response: ChatResponse = self
            .post(&body)
            .await?
            .json()
            .await
            .map_err(|e| self.error(format!("failed to parse summary response: {e}")))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| self.error("summary response was empty"))
    }
}
