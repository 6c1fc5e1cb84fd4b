use super::types::{AssistantReply, CompletionRequest, ModelError};
use async_trait::async_trait;

/// Seam between the agent loop and any chat-completion backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<AssistantReply, ModelError>;
}
