use crate::application::agent::DEFAULT_TURN_BUDGET;
use serde::Deserialize;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_CONFIG_PATH: &str = "config/graphtalk.toml";
const DEFAULT_MODEL: &str = "gemma3:1b";
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_SERVER_COMMAND: &str = "mcp-neo4j-cypher";
const DEFAULT_GRAPH_URI: &str = "neo4j://127.0.0.1:7687";
const DEFAULT_GRAPH_USER: &str = "neo4j";
const DEFAULT_GRAPH_DATABASE: &str = "neo4j";
const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an assistant connected to a Neo4j property graph through a fixed set of tools. \
The graph is your only source of factual data: never invent labels, properties, or values. \
When a question concerns the contents or structure of the graph, call a tool and answer \
from its result. Use the schema tool before writing Cypher against unfamiliar labels. \
General questions about graph concepts may be answered directly. Keep final answers short \
and concrete.";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub turn_budget: usize,
    pub call_timeout: Duration,
    pub system_prompt: Option<String>,
    pub server: ServerConfig,
    pub graph: GraphConfig,
    pub policy: ToolPolicy,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

/// Operator overrides for the read/write classification of tools. Takes
/// precedence over the server's own annotations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub mutating: Vec<String>,
    #[serde(default)]
    pub read_only: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0} is required; set it in the config file or the environment")]
    Missing(&'static str),
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    model: Option<String>,
    base_url: Option<String>,
    temperature: Option<f32>,
    turn_budget: Option<usize>,
    call_timeout_secs: Option<u64>,
    system_prompt: Option<String>,
    #[serde(default)]
    server: RawServer,
    #[serde(default)]
    graph: RawGraph,
    #[serde(default)]
    tools: ToolPolicy,
}

#[derive(Debug, Deserialize, Default)]
struct RawServer {
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawGraph {
    uri: Option<String>,
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
}

impl AppConfig {
    /// Load from an explicit path, or from the default path when present;
    /// a missing default file falls back to built-in defaults. Environment
    /// variables are applied on top either way.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = path {
            read_config(path)?
        } else {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            match read_config(default_path) {
                Ok(config) => config,
                Err(ConfigError::Io { source, .. })
                    if source.kind() == io::ErrorKind::NotFound =>
                {
                    info!("Configuration file not found; using defaults");
                    Self::from_raw(RawConfig::default())
                }
                Err(other) => return Err(other),
            }
        };
        config.apply_env();
        Ok(config)
    }

    /// Refuse to run with an incomplete configuration, as the original
    /// deployment did: a graph password and a model are mandatory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.graph.password.trim().is_empty() {
            return Err(ConfigError::Missing("NEO4J_PASSWORD"));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Missing("the model name"));
        }
        Ok(())
    }

    fn from_raw(raw: RawConfig) -> Self {
        Self {
            model: raw.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: raw.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            temperature: raw.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            turn_budget: raw.turn_budget.unwrap_or(DEFAULT_TURN_BUDGET),
            call_timeout: Duration::from_secs(
                raw.call_timeout_secs.unwrap_or(DEFAULT_CALL_TIMEOUT_SECS),
            ),
            system_prompt: raw.system_prompt,
            server: ServerConfig {
                command: raw
                    .server
                    .command
                    .unwrap_or_else(|| DEFAULT_SERVER_COMMAND.to_string()),
                args: raw.server.args,
            },
            graph: GraphConfig {
                uri: raw.graph.uri.unwrap_or_else(|| DEFAULT_GRAPH_URI.to_string()),
                user: raw
                    .graph
                    .user
                    .unwrap_or_else(|| DEFAULT_GRAPH_USER.to_string()),
                password: raw.graph.password.unwrap_or_default(),
                database: raw
                    .graph
                    .database
                    .unwrap_or_else(|| DEFAULT_GRAPH_DATABASE.to_string()),
            },
            policy: raw.tools,
        }
    }

    fn apply_env(&mut self) {
        if let Ok(model) = env::var("OLLAMA_MODEL") {
            self.model = model;
        }
        if let Ok(url) = env::var("OLLAMA_BASE_URL") {
            self.base_url = url;
        }
        if let Ok(command) = env::var("MCP_SERVER_PATH") {
            self.server.command = command;
        }
        if let Ok(uri) = env::var("NEO4J_URI") {
            self.graph.uri = uri;
        }
        if let Ok(user) = env::var("NEO4J_USERNAME").or_else(|_| env::var("NEO4J_USER")) {
            self.graph.user = user;
        }
        if let Ok(password) = env::var("NEO4J_PASSWORD") {
            self.graph.password = password;
        }
        if let Ok(database) = env::var("NEO4J_DATABASE") {
            self.graph.database = database;
        }
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    debug!(path = %path.display(), "Reading configuration file");
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(AppConfig::from_raw(parsed))
}
