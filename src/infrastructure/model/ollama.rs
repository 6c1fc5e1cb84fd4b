//! Ollama chat client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::adapter::MessageAdapter;
use super::parser::extract_tool_call;
use super::traits::ModelProvider;
use super::types::{AssistantReply, CompletionRequest, ModelError};
use crate::domain::transcript::ToolCallRequest;

const PROVIDER: &str = "ollama";

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    http: Client,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: Client::new(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ModelProvider for OllamaClient {
    async fn complete(&self, request: CompletionRequest) -> Result<AssistantReply, ModelError> {
        let messages =
            MessageAdapter::to_ollama_messages(request.system_prompt.as_deref(), &request.transcript);
        let payload = OllamaChatRequest {
            model: &request.model,
            messages,
            stream: false,
            tools: &request.tools,
            options: OllamaOptions {
                temperature: request.temperature,
            },
        };

        info!(
            model = request.model.as_str(),
            messages = request.transcript.len(),
            tools = request.tools.len(),
            "Sending chat request to Ollama"
        );

        let response = self
            .http
            .post(self.chat_url())
            .json(&payload)
            .send()
            .await
            .map_err(|source| ModelError::unreachable(PROVIDER, source))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ModelError::status(PROVIDER, status));
        }

        let body: OllamaChatResponse = response
            .json()
            .await
            .map_err(|source| ModelError::invalid_response(PROVIDER, source.to_string()))?;

        let message = body
            .message
            .ok_or_else(|| ModelError::invalid_response(PROVIDER, "missing message"))?;

        let mut tool_calls: Vec<ToolCallRequest> = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCallRequest::new(call.function.name, call.function.arguments))
            .collect();

        let text = message.content.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());

        // Models without native tool support emit the call as JSON text.
        if tool_calls.is_empty() {
            if let Some(content) = text.as_deref() {
                if let Some((name, arguments)) = extract_tool_call(content) {
                    debug!(tool = %name, "Recovered tool call from message text");
                    tool_calls.push(ToolCallRequest::new(name, arguments));
                    return Ok(AssistantReply {
                        text: None,
                        tool_calls,
                    });
                }
            }
        }

        debug!(
            tool_calls = tool_calls.len(),
            has_text = text.is_some(),
            "Received Ollama reply"
        );
        Ok(AssistantReply { text, tool_calls })
    }
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    stream: bool,
    #[serde(skip_serializing_if = "<[Value]>::is_empty")]
    tools: &'a [Value],
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Deserialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}
