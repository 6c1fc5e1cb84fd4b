mod adapter;
mod ollama;
mod parser;
mod traits;
mod types;

pub use adapter::MessageAdapter;
pub use ollama::OllamaClient;
pub use parser::extract_tool_call;
pub use traits::ModelProvider;
pub use types::{AssistantReply, CompletionRequest, ModelError};
