use std::time::Duration;

pub const DEFAULT_TURN_BUDGET: usize = 6;
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub system_prompt: Option<String>,
    /// Maximum number of tool-calling rounds per user query.
    pub turn_budget: usize,
    pub call_timeout: Duration,
    pub temperature: f32,
}

impl AgentSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            turn_budget: DEFAULT_TURN_BUDGET,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            temperature: 0.2,
        }
    }
}

/// One executed (or refused) tool call, kept for rendering and logging.
#[derive(Debug, Clone)]
pub struct AgentStep {
    pub call_id: String,
    pub tool: String,
    pub arguments: serde_json::Value,
    pub success: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub response: String,
    pub steps: Vec<AgentStep>,
    /// Set when the loop was cut off by the turn budget; the response is
    /// then a degraded note rather than a model answer.
    pub budget_exhausted: bool,
}
