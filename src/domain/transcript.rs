use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// A tool invocation requested by the model within one assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: format!("call-{}", Uuid::new_v4()),
            tool: tool.into(),
            arguments,
        }
    }
}

/// Outcome of executing (or refusing to execute) a single tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationResult {
    pub call_id: String,
    pub tool: String,
    pub success: bool,
    pub payload: Value,
    pub message: Option<String>,
}

impl ToolInvocationResult {
    pub fn completed(call: &ToolCallRequest, payload: Value, message: Option<String>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool: call.tool.clone(),
            success: true,
            payload,
            message,
        }
    }

    pub fn failed(call: &ToolCallRequest, message: impl Into<String>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool: call.tool.clone(),
            success: false,
            payload: Value::Null,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    User {
        text: String,
    },
    Assistant {
        text: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolResult(ToolInvocationResult),
}

#[derive(Debug, Error, PartialEq)]
pub enum TranscriptError {
    #[error("turn appended while {0} tool call(s) are still awaiting results")]
    CallsOutstanding(usize),
    #[error("duplicate call id '{0}' within one assistant turn")]
    DuplicateCallId(String),
    #[error("tool result for unknown or already consumed call id '{0}'")]
    UnmatchedResult(String),
}

/// Append-only conversation history for one session.
///
/// Every tool call emitted in an assistant turn must be answered by exactly
/// one tool result before the next user or assistant turn may be appended.
/// The transcript rejects any append that would break that pairing.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
    outstanding: Vec<ToolCallRequest>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Calls from the latest assistant turn that have no result yet.
    pub fn outstanding(&self) -> &[ToolCallRequest] {
        &self.outstanding
    }

    /// True when the transcript may be sent to the model provider.
    pub fn is_balanced(&self) -> bool {
        self.outstanding.is_empty()
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> Result<(), TranscriptError> {
        self.ensure_balanced()?;
        self.turns.push(Turn::User { text: text.into() });
        Ok(())
    }

    pub fn push_assistant(
        &mut self,
        text: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Result<(), TranscriptError> {
        self.ensure_balanced()?;
        let mut seen = std::collections::HashSet::new();
        for call in &tool_calls {
            if !seen.insert(call.call_id.as_str()) {
                return Err(TranscriptError::DuplicateCallId(call.call_id.clone()));
            }
        }
        self.outstanding = tool_calls.clone();
        self.turns.push(Turn::Assistant { text, tool_calls });
        Ok(())
    }

    pub fn push_tool_result(
        &mut self,
        result: ToolInvocationResult,
    ) -> Result<(), TranscriptError> {
        let position = self
            .outstanding
            .iter()
            .position(|call| call.call_id == result.call_id)
            .ok_or_else(|| TranscriptError::UnmatchedResult(result.call_id.clone()))?;
        self.outstanding.remove(position);
        self.turns.push(Turn::ToolResult(result));
        Ok(())
    }

    fn ensure_balanced(&self) -> Result<(), TranscriptError> {
        if self.outstanding.is_empty() {
            Ok(())
        } else {
            Err(TranscriptError::CallsOutstanding(self.outstanding.len()))
        }
    }
}
