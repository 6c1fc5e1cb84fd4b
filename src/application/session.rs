//! One interactive session: a live tool-server connection, the tool
//! registry built from its catalogue, and the committed transcript.

use crate::application::agent::{
    Agent, AgentError, AgentOutcome, AgentSettings, WriteApproval,
};
use crate::application::tooling::{
    ToolDescriptor, ToolRegistry, ToolServer, ToolTransport, TransportError,
};
use crate::config::AppConfig;
use crate::domain::transcript::Transcript;
use crate::infrastructure::model::ModelProvider;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("tool server connection lost; the session must be restarted")]
    ConnectionLost,
    #[error(transparent)]
    Agent(AgentError),
}

impl SessionError {
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Transport(err) => {
                format!("Could not talk to the tool server: {err}")
            }
            SessionError::ConnectionLost => {
                "The tool server died. Restart graphtalk to open a new session.".to_string()
            }
            SessionError::Agent(err) => err.user_message(),
        }
    }
}

pub struct Session<P: ModelProvider> {
    server: Arc<ToolServer>,
    agent: Agent<P>,
    transcript: Mutex<Transcript>,
    tools: Vec<ToolDescriptor>,
}

impl<P: ModelProvider> Session<P> {
    /// Spawn the tool server, fetch its catalogue once, and wire up the
    /// agent. The catalogue stays fixed for the session lifetime.
    pub async fn connect(
        config: &AppConfig,
        provider: Arc<P>,
        approval: Arc<dyn WriteApproval>,
    ) -> Result<Self, SessionError> {
        let server = Arc::new(
            ToolServer::connect(&config.server, &config.graph, config.call_timeout).await?,
        );
        let tools = server.list_tools(config.call_timeout).await?;
        if tools.is_empty() {
            warn!("Tool server advertised no tools; the model can only answer from itself");
        }
        info!(tools = tools.len(), "Session connected");

        let registry = Arc::new(ToolRegistry::new(tools.clone(), &config.policy));
        let system_prompt = compose_system_prompt(
            config.system_prompt.as_deref(),
            server.instructions().await.as_deref(),
            &registry,
        );

        let settings = AgentSettings {
            model: config.model.clone(),
            system_prompt: Some(system_prompt),
            turn_budget: config.turn_budget,
            call_timeout: config.call_timeout,
            temperature: config.temperature,
        };
        let agent = Agent::new(
            provider,
            Arc::clone(&server) as Arc<dyn ToolTransport>,
            registry,
            approval,
            settings,
        );

        Ok(Self {
            server,
            agent,
            transcript: Mutex::new(Transcript::new()),
            tools,
        })
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn is_alive(&self) -> bool {
        self.server.is_alive()
    }

    /// Run one user query. The agent works on a copy of the committed
    /// transcript; the copy replaces the original only when the exchange
    /// finishes, so a cancelled or failed turn leaves no partial state.
    pub async fn submit(&self, user_text: String) -> Result<AgentOutcome, SessionError> {
        let mut working = { self.transcript.lock().await.clone() };

        match self.agent.run(&mut working, user_text).await {
            Ok(outcome) => {
                *self.transcript.lock().await = working;
                Ok(outcome)
            }
            Err(AgentError::ConnectionLost) => {
                self.server.shutdown().await;
                Err(SessionError::ConnectionLost)
            }
            Err(err) => Err(SessionError::Agent(err)),
        }
    }

    pub async fn shutdown(&self) {
        info!("Shutting down session");
        self.server.shutdown().await;
    }
}

fn compose_system_prompt(
    configured: Option<&str>,
    server_instructions: Option<&str>,
    registry: &ToolRegistry,
) -> String {
    let mut sections = vec![configured
        .filter(|text| !text.trim().is_empty())
        .unwrap_or(crate::config::DEFAULT_SYSTEM_PROMPT)
        .trim()
        .to_string()];

    if let Some(instructions) = server_instructions.filter(|text| !text.trim().is_empty()) {
        sections.push(format!("Tool server guidance: {}", instructions.trim()));
    }

    if !registry.is_empty() {
        let mut lines = vec!["Available tools:".to_string()];
        for descriptor in registry.descriptors() {
            match &descriptor.description {
                Some(description) => lines.push(format!("- {}: {}", descriptor.name, description)),
                None => lines.push(format!("- {}", descriptor.name)),
            }
        }
        sections.push(lines.join("\n"));
    }

    sections.join("\n\n")
}
