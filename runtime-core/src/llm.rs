//! Minimal abstract LLM client (spec §1 "out of scope: LLM vendor wire
//! formats beyond a minimal abstract client"). Grounded on the teacher's
//! `llm::LlmClient` trait and `LlmUsage`/`LlmResponse` shapes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::message::{Message, ToolCall};
use crate::tool::ToolDefinition;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: LlmUsage,
}

impl LlmResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<LlmResponse, AgentError>;
}

/// Deterministic client for tests: replays a fixed queue of responses.
pub struct MockLlm {
    responses: std::sync::Mutex<std::collections::VecDeque<LlmResponse>>,
}

impl MockLlm {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
        }
    }

    pub fn with_final_answer(text: impl Into<String>) -> Self {
        Self::new(vec![LlmResponse {
            content: text.into(),
            tool_calls: vec![],
            usage: LlmUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        }])
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, _messages: &[Message], _tools: &[ToolDefinition]) -> Result<LlmResponse, AgentError> {
        let mut queue = self.responses.lock().unwrap();
        queue
            .pop_front()
            .ok_or_else(|| AgentError::Llm { message: "mock llm exhausted".to_string(), status: None })
    }
}

/// A thin OpenAI-compatible chat-completions client. Deliberately does not
/// attempt to cover streaming, function-call-format quirks, or multi-vendor
/// dialects — those are out of scope (spec §1).
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn invoke(&self, messages: &[Message], _tools: &[ToolDefinition]) -> Result<LlmResponse, AgentError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Llm { message: e.to_string(), status: e.status().map(|s| s.as_u16()) })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Llm { message: text, status: Some(status.as_u16()) });
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Llm { message: e.to_string(), status: None })?;

        let content = value["choices"][0]["message"]["content"].as_str().unwrap_or("").to_string();
        let usage = LlmUsage {
            prompt_tokens: value["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: value["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: value["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32,
        };
        Ok(LlmResponse { content, tool_calls: vec![], usage })
    }
}
