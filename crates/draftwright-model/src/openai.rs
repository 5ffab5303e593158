//! Client for OpenAI-compatible chat completion servers (OpenAI, Ollama,
//! llama.cpp, vLLM, ...).

use crate::ports::{ModelClient, ModelError, ModelRequest, ToolDefinition};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    /// Timeouts are left to `RetryingClient`.
    #[must_use]
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: None,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    async fn complete(&self, request: &ModelRequest) -> Result<Value, ModelError> {
        let body = build_body(&self.model, request);

        let mut call = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .map_err(|e| ModelError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ModelError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        debug!(model = %self.model, bytes = text.len(), "Model response received");

        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'r> {
    model: &'r str,
    messages: Vec<ChatMessage<'r>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool<'r>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'r> {
    role: &'static str,
    content: &'r str,
}

#[derive(Debug, Serialize)]
struct ChatTool<'r> {
    r#type: &'static str,
    function: &'r ToolDefinition,
}

fn build_body<'r>(model: &'r str, request: &'r ModelRequest) -> ChatRequest<'r> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = &request.system_prompt {
        messages.push(ChatMessage {
            role: "system",
            content: system,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: &request.prompt,
    });

    ChatRequest {
        model,
        messages,
        temperature: request.temperature,
        tools: request
            .tools
            .iter()
            .map(|function| ChatTool {
                r#type: "function",
                function,
            })
            .collect(),
    }
}
