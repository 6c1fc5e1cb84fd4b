//! Converts the transcript into the Ollama chat message format.

use crate::domain::transcript::{ToolInvocationResult, Transcript, Turn};
use serde_json::{json, Value};

pub struct MessageAdapter;

impl MessageAdapter {
    /// Render the transcript as an Ollama `/api/chat` message array.
    ///
    /// Assistant tool calls are echoed back in the shape Ollama emits them,
    /// tool results become `role: tool` messages carrying either the result
    /// text or an error marker the model can react to.
    pub fn to_ollama_messages(system_prompt: Option<&str>, transcript: &Transcript) -> Vec<Value> {
        let mut messages = Vec::with_capacity(transcript.len() + 1);

        if let Some(system) = system_prompt.filter(|text| !text.trim().is_empty()) {
            messages.push(json!({ "role": "system", "content": system }));
        }

        for turn in transcript.turns() {
            match turn {
                Turn::User { text } => {
                    messages.push(json!({ "role": "user", "content": text }));
                }
                Turn::Assistant { text, tool_calls } => {
                    let mut message = json!({
                        "role": "assistant",
                        "content": text.clone().unwrap_or_default(),
                    });
                    if !tool_calls.is_empty() {
                        let calls: Vec<Value> = tool_calls
                            .iter()
                            .map(|call| {
                                json!({
                                    "function": {
                                        "name": call.tool,
                                        "arguments": call.arguments,
                                    }
                                })
                            })
                            .collect();
                        message["tool_calls"] = Value::Array(calls);
                    }
                    messages.push(message);
                }
                Turn::ToolResult(result) => {
                    messages.push(json!({
                        "role": "tool",
                        "tool_name": result.tool,
                        "content": Self::result_content(result),
                    }));
                }
            }
        }

        messages
    }

    fn result_content(result: &ToolInvocationResult) -> String {
        if result.success {
            match result.message.clone() {
                Some(text) => text,
                None => serde_json::to_string(&result.payload).unwrap_or_default(),
            }
        } else {
            format!(
                "ERROR: {}",
                result.message.as_deref().unwrap_or("tool call failed")
            )
        }
    }
}
