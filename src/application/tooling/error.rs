use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn tool server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tool server transport error: {0}")]
    Io(String),
    #[error("tool server returned invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("tool server returned JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("tool server call timed out after {0:?}")]
    Timeout(Duration),
    #[error("tool server process terminated")]
    ConnectionLost,
}

impl TransportError {
    /// Fatal errors end the session; everything else is surfaced as a
    /// failed tool result and the conversation continues.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::ConnectionLost)
    }
}
