mod approval;
mod errors;
mod models;
mod runner;

#[cfg(test)]
mod tests;

pub use approval::{DenyAll, ToolDecision, WriteApproval};
pub use errors::AgentError;
pub use models::{AgentOutcome, AgentSettings, AgentStep, DEFAULT_TURN_BUDGET};
pub use runner::Agent;
