//! Completion client request, reply, and error types.

use crate::domain::transcript::{ToolCallRequest, Transcript};
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// One stateless completion call: the full transcript travels every time,
/// the provider is not assumed to retain any conversation state.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub transcript: Transcript,
    pub tools: Vec<Value>,
    pub temperature: f32,
}

/// Parsed provider response: either a plain-text answer or one or more
/// tool-call requests (both may be present when the model narrates).
#[derive(Debug, Clone)]
pub struct AssistantReply {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl AssistantReply {
    pub fn is_answer(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model provider '{provider}' is unreachable: {source}")]
    Unreachable {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("model provider '{provider}' returned status {status}")]
    Status { provider: String, status: StatusCode },
    #[error("model provider '{provider}' returned an invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl ModelError {
    pub fn unreachable(provider: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Unreachable {
            provider: provider.into(),
            source,
        }
    }

    pub fn status(provider: impl Into<String>, status: StatusCode) -> Self {
        Self::Status {
            provider: provider.into(),
            status,
        }
    }

    pub fn invalid_response(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            ModelError::Unreachable { provider, source } => {
                if source.is_timeout() {
                    format!("The request to '{provider}' timed out. Try again.")
                } else {
                    format!(
                        "Cannot reach the model provider '{provider}'. Is it running?"
                    )
                }
            }
            ModelError::Status { provider, status } => match *status {
                StatusCode::NOT_FOUND => {
                    format!("'{provider}' does not know the requested model or endpoint.")
                }
                StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                    format!("The model provider '{provider}' is currently unavailable.")
                }
                other => format!("Request to '{provider}' failed with status {}.", other.as_u16()),
            },
            ModelError::InvalidResponse { provider, .. } => {
                format!("The response from '{provider}' could not be understood.")
            }
        }
    }
}
