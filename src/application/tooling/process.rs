use super::error::TransportError;
use super::interface::{ToolDescriptor, ToolTransport};
use crate::config::{GraphConfig, ServerConfig};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

/// Protocol revision spoken by mcp-neo4j-cypher.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Owns the one live stdio connection to the MCP tool server.
///
/// Requests are newline-delimited JSON-RPC 2.0 messages correlated by a
/// numeric id; a background task reads responses and resolves the pending
/// oneshot for each. Once the subprocess dies the connection is gone for
/// good and every call reports [`TransportError::ConnectionLost`].
pub struct ToolServer {
    inner: Arc<Inner>,
}

struct Inner {
    command: String,
    child: AsyncMutex<Option<Child>>,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    pending: AsyncMutex<HashMap<u64, oneshot::Sender<Result<Value, TransportError>>>>,
    id_counter: AtomicU64,
    alive: AtomicBool,
    instructions: AsyncMutex<Option<String>>,
}

impl ToolServer {
    /// Spawn the tool server subprocess and run the initialize handshake.
    ///
    /// Graph connection parameters travel to the server through the
    /// `NEO4J_*` environment variables it expects.
    pub async fn connect(
        server: &ServerConfig,
        graph: &GraphConfig,
        handshake_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut command = Command::new(&server.command);
        command
            .args(&server.args)
            .env("NEO4J_URI", &graph.uri)
            .env("NEO4J_USERNAME", &graph.user)
            .env("NEO4J_PASSWORD", &graph.password)
            .env("NEO4J_DATABASE", &graph.database)
            .env("NEO4J_TRANSPORT", "stdio")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        debug!(command = %server.command, args = ?server.args, "Spawning tool server");
        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            command: server.command.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Io("failed to capture server stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Io("failed to capture server stdout".into()))?;

        let inner = Arc::new(Inner {
            command: server.command.clone(),
            child: AsyncMutex::new(Some(child)),
            writer: AsyncMutex::new(Some(BufWriter::new(stdin))),
            pending: AsyncMutex::new(HashMap::new()),
            id_counter: AtomicU64::new(1),
            alive: AtomicBool::new(true),
            instructions: AsyncMutex::new(None),
        });

        let reader = Arc::clone(&inner);
        tokio::spawn(async move {
            reader.reader_loop(stdout).await;
        });

        let connection = Self { inner };
        match connection.initialize(handshake_timeout).await {
            Ok(()) => {
                info!(command = %connection.inner.command, "Tool server ready");
                Ok(connection)
            }
            Err(err) => {
                connection.shutdown().await;
                Err(err)
            }
        }
    }

    async fn initialize(&self, timeout: Duration) -> Result<(), TransportError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {},
        });
        let result = self.inner.send_request("initialize", params, timeout).await?;
        if let Some(text) = result.get("instructions").and_then(Value::as_str) {
            let mut instructions = self.inner.instructions.lock().await;
            *instructions = Some(text.to_string());
        }
        self.inner
            .send_notification("notifications/initialized", json!({}))
            .await
    }

    /// Fetch the tool catalogue. Called once per session; the resulting
    /// descriptors are immutable afterwards.
    pub async fn list_tools(
        &self,
        timeout: Duration,
    ) -> Result<Vec<ToolDescriptor>, TransportError> {
        let result = self
            .inner
            .send_request("tools/list", json!({}), timeout)
            .await?;
        let Some(tools) = result.get("tools").and_then(Value::as_array) else {
            return Err(TransportError::Io(
                "tools/list response missing 'tools' array".into(),
            ));
        };

        let mut descriptors = Vec::with_capacity(tools.len());
        for tool in tools {
            let Some(name) = tool.get("name").and_then(Value::as_str) else {
                continue;
            };
            descriptors.push(ToolDescriptor {
                name: name.to_string(),
                description: tool
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                input_schema: tool.get("inputSchema").cloned(),
                read_only_hint: tool
                    .get("annotations")
                    .and_then(|a| a.get("readOnlyHint"))
                    .and_then(Value::as_bool),
            });
        }
        Ok(descriptors)
    }

    /// Instructions the server offered during the handshake, if any.
    pub async fn instructions(&self) -> Option<String> {
        self.inner.instructions.lock().await.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    /// Terminate the subprocess and fail any in-flight requests.
    pub async fn shutdown(&self) {
        self.inner.reset().await;
    }
}

#[async_trait]
impl ToolTransport for ToolServer {
    async fn invoke_tool(
        &self,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let params = json!({
            "name": tool,
            "arguments": match arguments {
                Value::Null => Value::Object(Default::default()),
                other => other,
            },
        });
        self.inner.send_request("tools/call", params, timeout).await
    }
}

impl Inner {
    async fn send_request(
        self: &Arc<Self>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost);
        }

        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if let Err(err) = self.write_message(&payload).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome.map(|value| value.get("result").cloned().unwrap_or(Value::Null)),
            Ok(Err(_)) => Err(TransportError::ConnectionLost),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                warn!(method, request_id = id, "Tool server call timed out");
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<(), TransportError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write_message(&payload).await
    }

    async fn send_response(&self, id: Value, result: Value) -> Result<(), TransportError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        });
        self.write_message(&payload).await
    }

    async fn send_error(&self, id: Value, code: i64, message: String) -> Result<(), TransportError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message },
        });
        self.write_message(&payload).await
    }

    async fn write_message(&self, message: &Value) -> Result<(), TransportError> {
        let encoded = serde_json::to_string(message)
            .map_err(|source| TransportError::InvalidJson { source })?;

        let mut writer = self.writer.lock().await;
        let stream = writer
            .as_mut()
            .ok_or(TransportError::ConnectionLost)?;
        let write = async {
            stream.write_all(encoded.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await
        };
        write.await.map_err(|source| {
            if self.alive.load(Ordering::SeqCst) {
                TransportError::Io(source.to_string())
            } else {
                TransportError::ConnectionLost
            }
        })
    }

    async fn reader_loop(self: Arc<Self>, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(raw)) => {
                    let trimmed = raw.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(trimmed) {
                        Ok(value) => self.dispatch_inbound(value).await,
                        Err(source) => {
                            warn!(line = trimmed, %source, "Tool server emitted invalid JSON");
                        }
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }

        warn!(command = %self.command, "Tool server closed its stdout; connection lost");
        self.reset().await;
    }

    async fn dispatch_inbound(&self, value: Value) {
        match (value.get("id").cloned(), value.get("method").is_some()) {
            (Some(id), false) => self.handle_response(id, value).await,
            (Some(id), true) => self.handle_server_request(id, value).await,
            (None, true) => {
                let method = value
                    .get("method")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                // Tool catalogue is fixed for the session; note the change only.
                debug!(method, "Notification from tool server");
            }
            (None, false) => {}
        }
    }

    async fn handle_response(&self, id: Value, value: Value) {
        let Some(key) = id.as_u64() else {
            debug!(?id, "Response with non-numeric id from tool server");
            return;
        };

        let sender = self.pending.lock().await.remove(&key);
        let Some(sender) = sender else {
            debug!(request_id = key, "Response for unknown or abandoned request");
            return;
        };

        let outcome = if let Some(error) = value.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            Err(TransportError::Rpc { code, message })
        } else {
            Ok(value)
        };
        let _ = sender.send(outcome);
    }

    async fn handle_server_request(&self, id: Value, value: Value) {
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let reply = match method {
            "ping" => self.send_response(id, json!({})).await,
            other => {
                warn!(method = other, "Tool server sent unsupported request");
                self.send_error(
                    id,
                    -32601,
                    format!("client does not implement method '{other}'"),
                )
                .await
            }
        };
        if let Err(err) = reply {
            warn!(%err, "Failed to answer tool server request");
        }
    }

    async fn reset(&self) {
        self.alive.store(false, Ordering::SeqCst);

        {
            let mut writer = self.writer.lock().await;
            *writer = None;
        }

        {
            let mut child = self.child.lock().await;
            if let Some(mut process) = child.take() {
                if let Err(err) = process.kill().await {
                    debug!(%err, "Tool server already exited");
                }
                let _ = process.wait().await;
            }
        }

        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(TransportError::ConnectionLost));
        }
    }
}

/// True when an MCP `tools/call` result flags an application-level error.
pub fn payload_is_error(result: &Value) -> bool {
    result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// First non-empty text block of an MCP `tools/call` result.
pub fn payload_text(result: &Value) -> Option<String> {
    let blocks = result.get("content").and_then(Value::as_array)?;
    blocks.iter().find_map(|block| {
        let is_text = block
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|kind| kind.eq_ignore_ascii_case("text"));
        if !is_text {
            return None;
        }
        block
            .get("text")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_error_payloads() {
        assert!(payload_is_error(&json!({"isError": true})));
        assert!(!payload_is_error(&json!({"isError": false})));
        assert!(!payload_is_error(&json!({"content": []})));
    }

    #[test]
    fn extracts_first_text_block() {
        let payload = json!({
            "content": [
                { "type": "image", "data": "..." },
                { "type": "text", "text": "  [\"Customer\", \"Order\"]  " },
                { "type": "text", "text": "second" }
            ]
        });
        assert_eq!(payload_text(&payload).as_deref(), Some("[\"Customer\", \"Order\"]"));
    }

    #[test]
    fn text_extraction_skips_empty_blocks() {
        let payload = json!({ "content": [ { "type": "text", "text": "   " } ] });
        assert_eq!(payload_text(&payload), None);
    }
}
