use super::approval::{ToolDecision, WriteApproval};
use super::errors::AgentError;
use super::models::{AgentOutcome, AgentSettings, AgentStep};
use crate::application::tooling::{
    payload_is_error, payload_text, ToolRegistry, ToolTransport,
};
use crate::domain::transcript::{ToolCallRequest, ToolInvocationResult, Transcript};
use crate::infrastructure::model::{CompletionRequest, ModelProvider};
use std::sync::Arc;
use tracing::{debug, info, warn};

const BUDGET_NOTE: &str = "I hit the tool-call limit for this question before reaching an \
answer. Try again with a simpler or more specific question.";

/// How long a tool payload may get before its log line is truncated.
const LOG_PAYLOAD_LIMIT: usize = 800;

enum LoopState {
    ModelThinking,
    ToolCallsPending(Vec<ToolCallRequest>),
    Answered(String),
}

/// The turn-cycle controller: ask the model, execute any requested tools,
/// feed results back, repeat until a plain-text answer or the turn budget
/// runs out.
pub struct Agent<P: ModelProvider> {
    provider: Arc<P>,
    transport: Arc<dyn ToolTransport>,
    registry: Arc<ToolRegistry>,
    approval: Arc<dyn WriteApproval>,
    settings: AgentSettings,
}

impl<P: ModelProvider> Agent<P> {
    pub fn new(
        provider: Arc<P>,
        transport: Arc<dyn ToolTransport>,
        registry: Arc<ToolRegistry>,
        approval: Arc<dyn WriteApproval>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            provider,
            transport,
            registry,
            approval,
            settings,
        }
    }

    /// Drive one user query to completion, appending every turn to the
    /// given transcript. The transcript is balanced again when this
    /// returns `Ok`, whatever path the loop took.
    pub async fn run(
        &self,
        transcript: &mut Transcript,
        prompt: String,
    ) -> Result<AgentOutcome, AgentError> {
        info!("Agent run started");
        transcript.push_user(prompt)?;

        let schemas = self.registry.provider_schemas();
        let mut steps = Vec::new();
        let mut rounds = 0usize;
        let mut state = LoopState::ModelThinking;

        loop {
            state = match state {
                LoopState::ModelThinking => {
                    debug!(rounds, "Requesting completion");
                    let reply = self
                        .provider
                        .complete(CompletionRequest {
                            model: self.settings.model.clone(),
                            system_prompt: self.settings.system_prompt.clone(),
                            transcript: transcript.clone(),
                            tools: schemas.clone(),
                            temperature: self.settings.temperature,
                        })
                        .await?;

                    if reply.is_answer() {
                        let answer = reply.text.unwrap_or_default();
                        transcript.push_assistant(Some(answer.clone()), Vec::new())?;
                        LoopState::Answered(answer)
                    } else {
                        transcript
                            .push_assistant(reply.text.clone(), reply.tool_calls.clone())?;
                        LoopState::ToolCallsPending(reply.tool_calls)
                    }
                }
                LoopState::ToolCallsPending(calls) => {
                    rounds += 1;
                    if rounds > self.settings.turn_budget {
                        warn!(
                            budget = self.settings.turn_budget,
                            "Turn budget exhausted; terminating with degraded answer"
                        );
                        for call in &calls {
                            transcript.push_tool_result(ToolInvocationResult::failed(
                                call,
                                "turn budget exhausted; call not executed",
                            ))?;
                        }
                        return Ok(AgentOutcome {
                            response: BUDGET_NOTE.to_string(),
                            steps,
                            budget_exhausted: true,
                        });
                    }

                    // All results are collected before any is appended, so
                    // the transcript never holds a partial round.
                    let mut results = Vec::with_capacity(calls.len());
                    for call in &calls {
                        results.push(self.execute(call).await?);
                    }
                    for result in results {
                        steps.push(AgentStep {
                            call_id: result.call_id.clone(),
                            tool: result.tool.clone(),
                            arguments: calls
                                .iter()
                                .find(|call| call.call_id == result.call_id)
                                .map(|call| call.arguments.clone())
                                .unwrap_or_default(),
                            success: result.success,
                            message: result.message.clone(),
                        });
                        transcript.push_tool_result(result)?;
                    }
                    LoopState::ModelThinking
                }
                LoopState::Answered(answer) => {
                    info!(steps = steps.len(), rounds, "Agent produced final answer");
                    return Ok(AgentOutcome {
                        response: answer,
                        steps,
                        budget_exhausted: false,
                    });
                }
            };
        }
    }

    /// Execute a single call. Unknown names, invalid arguments, declined
    /// mutations, and per-call transport failures all come back as failed
    /// results so the conversation can continue; only the loss of the
    /// server connection escalates.
    async fn execute(
        &self,
        call: &ToolCallRequest,
    ) -> Result<ToolInvocationResult, AgentError> {
        let tool = match self.registry.resolve(&call.tool) {
            Ok(tool) => tool,
            Err(err) => return Ok(ToolInvocationResult::failed(call, err.to_string())),
        };

        if let Err(err) = self.registry.validate_arguments(&call.tool, &call.arguments) {
            return Ok(ToolInvocationResult::failed(call, err.to_string()));
        }

        if tool.mutating {
            match self.approval.review(&call.tool, &call.arguments).await {
                ToolDecision::Approve => {
                    info!(tool = %call.tool, "Mutating call approved");
                }
                ToolDecision::Deny => {
                    info!(tool = %call.tool, "Mutating call declined");
                    return Ok(ToolInvocationResult::failed(
                        call,
                        "mutation declined by the operator; do not retry this write",
                    ));
                }
            }
        }

        debug!(tool = %call.tool, call_id = %call.call_id, "Dispatching tool call");
        match self
            .transport
            .invoke_tool(&call.tool, call.arguments.clone(), self.settings.call_timeout)
            .await
        {
            Ok(payload) => {
                let message = payload_text(&payload);
                let result = if payload_is_error(&payload) {
                    ToolInvocationResult::failed(
                        call,
                        message.unwrap_or_else(|| "tool reported an error".to_string()),
                    )
                } else {
                    ToolInvocationResult::completed(call, payload, message)
                };
                info!(
                    tool = %result.tool,
                    success = result.success,
                    payload = %truncate_for_log(&result),
                    "Tool executed"
                );
                Ok(result)
            }
            Err(err) if err.is_fatal() => {
                warn!(tool = %call.tool, %err, "Tool server connection lost");
                Err(AgentError::ConnectionLost)
            }
            Err(err) => {
                warn!(tool = %call.tool, %err, "Tool call failed; continuing conversation");
                Ok(ToolInvocationResult::failed(call, err.to_string()))
            }
        }
    }
}

fn truncate_for_log(result: &ToolInvocationResult) -> String {
    let mut rendered = result
        .message
        .clone()
        .unwrap_or_else(|| result.payload.to_string());
    if rendered.len() > LOG_PAYLOAD_LIMIT {
        let mut cut = LOG_PAYLOAD_LIMIT;
        while !rendered.is_char_boundary(cut) {
            cut -= 1;
        }
        rendered.truncate(cut);
        rendered.push_str("...");
    }
    rendered
}
