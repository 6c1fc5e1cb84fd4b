use async_trait::async_trait;
use serde_json::Value;

/// Decision for a single mutating tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolDecision {
    Approve,
    Deny,
}

/// Collaborator consulted before any mutating tool call reaches the
/// transport. The agent loop never approves a mutation on its own.
#[async_trait]
pub trait WriteApproval: Send + Sync {
    async fn review(&self, tool: &str, arguments: &Value) -> ToolDecision;
}

/// Refuses every mutation. The safe default for non-interactive use.
pub struct DenyAll;

#[async_trait]
impl WriteApproval for DenyAll {
    async fn review(&self, _tool: &str, _arguments: &Value) -> ToolDecision {
        ToolDecision::Deny
    }
}
