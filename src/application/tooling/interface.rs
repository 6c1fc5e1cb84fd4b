use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::error::TransportError;

/// Tool metadata as advertised by the server's `tools/list` response.
///
/// Descriptors are fetched once at session start and stay immutable for
/// the session lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
    /// MCP `annotations.readOnlyHint`, when the server provides one.
    pub read_only_hint: Option<bool>,
}

#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Execute one tool call against the server. Calls are serialized on
    /// the single underlying connection.
    async fn invoke_tool(
        &self,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError>;
}
