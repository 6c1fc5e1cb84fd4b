use async_trait::async_trait;
use clap::Parser;
use graphtalk::agent::{ToolDecision, WriteApproval};
use graphtalk::config::AppConfig;
use graphtalk::model::OllamaClient;
use graphtalk::session::{Session, SessionError};
use serde_json::Value;
use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "graphtalk",
    version,
    about = "Chat with a Neo4j property graph through MCP tools and a local Ollama model"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the Ollama endpoint.
    #[arg(long)]
    base_url: Option<String>,
    /// Override the model name.
    #[arg(long)]
    model: Option<String>,
    /// Override the system prompt.
    #[arg(long)]
    system: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    debug!(?cli.config, ?cli.model, "CLI arguments parsed");

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(model) = cli.model {
        config.model = model;
    }
    if cli.system.is_some() {
        config.system_prompt = cli.system;
    }
    config.validate()?;

    info!(model = %config.model, base_url = %config.base_url, "Starting graphtalk");
    let provider = Arc::new(OllamaClient::new(config.base_url.clone()));
    let input = Arc::new(ConsoleInput::from_stdin());
    let approval: Arc<dyn WriteApproval> = Arc::new(PromptApproval {
        input: Arc::clone(&input),
    });

    println!("Connecting to the tool server...");
    let session = Session::connect(&config, provider, approval).await?;

    println!("graphtalk — ask questions about your Neo4j graph");
    println!("Model {} via {}", config.model, config.base_url);
    println!("Tools ({}):", session.tools().len());
    for tool in session.tools() {
        match &tool.description {
            Some(description) => println!("  - {}: {}", tool.name, description),
            None => println!("  - {}", tool.name),
        }
    }
    println!("Type 'exit' to quit.");

    loop {
        let Some(line) = input.read_line("\nyou> ").await? else {
            break;
        };
        if line.is_empty() {
            continue;
        }
        if matches!(line.to_lowercase().as_str(), "exit" | "quit" | "bye") {
            break;
        }

        tokio::select! {
            outcome = session.submit(line) => match outcome {
                Ok(outcome) => {
                    for step in &outcome.steps {
                        let status = if step.success { "ok" } else { "failed" };
                        println!("  [tool {} {}] {}", step.tool, status,
                            step.message.as_deref().unwrap_or(""));
                    }
                    println!("\n{}", outcome.response);
                }
                Err(SessionError::ConnectionLost) => {
                    eprintln!("{}", SessionError::ConnectionLost.user_message());
                    break;
                }
                Err(err) => {
                    eprintln!("{}", err.user_message());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                // The in-flight turn is dropped whole; committed history
                // is untouched. Anything typed at a now-dead approval
                // prompt is dropped with it.
                input.discard_pending().await;
                println!("\nInterrupted; that question was discarded.");
            }
        }
    }

    println!("Shutting down...");
    session.shutdown().await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("graphtalk=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Interactive gate for mutating tools: show the intended write and ask.
struct PromptApproval {
    input: Arc<ConsoleInput>,
}

#[async_trait]
impl WriteApproval for PromptApproval {
    async fn review(&self, tool: &str, arguments: &Value) -> ToolDecision {
        println!("\nThe model wants to run the mutating tool '{tool}' with:");
        println!(
            "{}",
            serde_json::to_string_pretty(arguments).unwrap_or_else(|_| arguments.to_string())
        );
        match self.input.read_line("Execute this write? [y/N] ").await {
            Ok(Some(reply))
                if matches!(reply.to_lowercase().as_str(), "y" | "yes") =>
            {
                ToolDecision::Approve
            }
            _ => ToolDecision::Deny,
        }
    }
}

/// One long-lived stdin reader behind a channel. Prompts are plain channel
/// reads, so a prompt future dropped by ctrl-c leaves no orphaned stdin
/// read behind to swallow the next typed line.
struct ConsoleInput {
    lines: Mutex<mpsc::Receiver<String>>,
}

impl ConsoleInput {
    fn from_stdin() -> Self {
        let (tx, rx) = mpsc::channel(8);
        std::thread::spawn(move || {
            let mut line = String::new();
            loop {
                line.clear();
                match io::stdin().read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.blocking_send(line.trim().to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self::from_receiver(rx)
    }

    fn from_receiver(lines: mpsc::Receiver<String>) -> Self {
        Self {
            lines: Mutex::new(lines),
        }
    }

    /// Show the prompt and wait for the next line. `None` means EOF.
    async fn read_line(&self, prompt: &str) -> io::Result<Option<String>> {
        use std::io::Write;
        let mut stdout = io::stdout();
        write!(stdout, "{prompt}")?;
        stdout.flush()?;
        Ok(self.lines.lock().await.recv().await)
    }

    /// Drop lines typed at a prompt that no longer exists.
    async fn discard_pending(&self) {
        let mut lines = self.lines.lock().await;
        while lines.try_recv().is_ok() {}
    }
}
