//! graphtalk: ask a local Ollama model questions about a Neo4j property
//! graph. The model never answers graph questions from its own weights;
//! it calls the schema and Cypher tools exposed by an MCP tool server
//! and the agent loop feeds the results back until an answer emerges.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::{agent, session, tooling};
pub use domain::transcript;
pub use infrastructure::model;
