use crate::domain::transcript::TranscriptError;
use crate::infrastructure::model::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("tool server connection lost")]
    ConnectionLost,
    #[error("transcript invariant violated: {0}")]
    Transcript(#[from] TranscriptError),
}

impl AgentError {
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Model(err) => err.user_message(),
            AgentError::ConnectionLost => {
                "The tool server died. Restart the session to continue.".to_string()
            }
            AgentError::Transcript(_) => {
                "The conversation state became inconsistent. Please start over.".to_string()
            }
        }
    }
}
