//! Model collaborator seam and a blocking OpenAI-compatible client.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::core::state::Stage;
use crate::core::types::{ChatMessage, Role, ToolCall, ToolSchema};
use crate::io::config::ModelConfig;

/// One model call: the conversation so far and the tools it may call.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    /// Stage issuing the call; informational only.
    pub stage: Stage,
    pub messages: &'a [ChatMessage],
    /// Empty means the reply must be plain text.
    pub tools: &'a [ToolSchema],
}

/// Anything that can answer a chat request.
///
/// Implementations need not be deterministic; the state machine tolerates
/// any reply and never retries.
pub trait ChatModel {
    fn generate(&self, request: &ChatRequest<'_>) -> Result<ChatMessage>;
}

/// Chat completions client (`POST {base_url}/chat/completions`).
#[derive(Debug, Clone)]
pub struct OpenAiChatModel {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiChatModel {
    /// Build from config; the API key is read from `api_key_env` when set.
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            debug!(env = %cfg.api_key_env, "no API key in environment; sending unauthenticated requests");
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
            model: cfg.model.clone(),
            api_key,
        })
    }
}

impl ChatModel for OpenAiChatModel {
    #[instrument(skip_all, fields(stage = %request.stage, messages = request.messages.len(), tools = request.tools.len()))]
    fn generate(&self, request: &ChatRequest<'_>) -> Result<ChatMessage> {
        let body = build_request_body(&self.model, request);
        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder
            .send()
            .with_context(|| format!("send chat request to {}", self.endpoint))?;
        let status = resp.status();
        let text = resp.text().context("read chat response body")?;
        if !status.is_success() {
            return Err(anyhow!("chat endpoint returned {}: {}", status, text));
        }
        parse_response(&text)
    }
}

pub(crate) fn build_request_body(model: &str, request: &ChatRequest<'_>) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(encode_message).collect();
    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": 0,
    });
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|schema| {
                json!({
                    "type": "function",
                    "function": {
                        "name": schema.name,
                        "description": schema.description,
                        "parameters": schema.to_json_schema(),
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
        body["tool_choice"] = json!("auto");
    }
    body
}

fn encode_message(message: &ChatMessage) -> Value {
    let mut value = json!({
        "role": message.role,
        "content": message.content,
    });
    if !message.tool_calls.is_empty() {
        let calls: Vec<Value> = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": call.arguments },
                })
            })
            .collect();
        value["tool_calls"] = Value::Array(calls);
    }
    value
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

pub(crate) fn parse_response(body: &str) -> Result<ChatMessage> {
    let parsed: CompletionResponse =
        serde_json::from_str(body).context("chat response is not valid JSON")?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("chat response has no choices"))?;
    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
        })
        .collect();
    Ok(ChatMessage {
        role: Role::Assistant,
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
    })
}
