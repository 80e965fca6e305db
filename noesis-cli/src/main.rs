//! Noesis CLI - talk to the assistant and inspect its catalog

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use noesis_core::llm::ToolCall;
use noesis_core::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "noesis")]
#[command(about = "Multi-agent tool-use assistant", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./noesis.toml and the user config dir)
    #[arg(short, long, global = true, env = "NOESIS_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant; reads stdin line by line without --message
    Chat {
        /// Send a single message and exit
        #[arg(short, long)]
        message: Option<String>,

        /// Lower the iteration ceiling for each message
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Print tool activity to stderr
        #[arg(short, long)]
        verbose: bool,
    },
    /// List the tools offered to the oracle
    Capabilities {
        /// Print full definitions as JSON
        #[arg(long)]
        json: bool,
    },
    /// List declared teams
    Teams,
    /// Print the effective configuration
    Config,
    /// Version information
    Version,
}

/// Prints tool activity for interactive use
struct PrintHooks;

impl ProgressHooks for PrintHooks {
    fn on_tool_call(&self, call: &ToolCall) {
        eprintln!("  → {} {}", call.name, call.arguments);
    }

    fn on_tool_result(&self, record: &ToolInvocationRecord) {
        let mark = if record.is_success() { "ok" } else { "failed" };
        match &record.provenance {
            Some(provenance) => eprintln!("  ← {} {} ({} ms)", record.tool, mark, provenance.duration_ms),
            None => eprintln!("  ← {} {}", record.tool, mark),
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<NoesisConfig> {
    let config = match path {
        Some(path) => NoesisConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NoesisConfig::load().context("loading configuration")?,
    };
    Ok(config)
}

/// Assistant for commands that only inspect the catalog
fn offline_assistant(mut config: NoesisConfig) -> Result<Assistant> {
    config.llm.provider = ProviderKind::Stub;
    Ok(AssistantBuilder::new(config).build()?)
}

async fn chat(
    config: NoesisConfig,
    message: Option<String>,
    max_iterations: Option<u32>,
    verbose: bool,
) -> Result<()> {
    let mut builder = AssistantBuilder::new(config);
    if verbose {
        builder = builder.with_hooks(Arc::new(PrintHooks));
    }
    let assistant = builder.build()?;
    let mut session = assistant.session();

    let limit = max_iterations.unwrap_or(u32::MAX);

    if let Some(message) = message {
        let outcome = session.send_with_limit(&message, limit).await;
        println!("{}", outcome.text);
        if !outcome.is_completed() {
            anyhow::bail!("run ended with status {:?}", outcome.status);
        }
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("noesis {} (empty line or Ctrl-D to quit)", noesis_core::VERSION);
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let outcome = session.send_with_limit(line, limit).await;
        println!("{}\n", outcome.text);
        if !outcome.is_completed() {
            eprintln!("[{:?} after {} iteration(s)]", outcome.status, outcome.iterations);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("noesis {}", env!("CARGO_PKG_VERSION"));
            println!("noesis-core {}", noesis_core::VERSION);
        }
        Commands::Config => {
            let config = load_config(cli.config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Capabilities { json } => {
            let assistant = offline_assistant(load_config(cli.config)?)?;
            let definitions = assistant.tool_definitions();
            if json {
                println!("{}", serde_json::to_string_pretty(&definitions)?);
            } else {
                for definition in definitions {
                    println!("{:<20} {}", definition.name, definition.description);
                }
            }
        }
        Commands::Teams => {
            let assistant = offline_assistant(load_config(cli.config)?)?;
            let teams = assistant.registry().teams();
            if teams.is_empty() {
                println!("No teams defined.");
            }
            for team in teams {
                let roles: Vec<&str> = team.members.iter().map(|m| m.role.as_str()).collect();
                println!(
                    "{:<20} {} [{}] (max {} turns, depth {})",
                    team.name,
                    team.description,
                    roles.join(", "),
                    team.default_max_turns,
                    team.max_depth
                );
            }
        }
        Commands::Chat {
            message,
            max_iterations,
            verbose,
        } => {
            let config = load_config(cli.config)?;
            chat(config, message, max_iterations, verbose).await?;
        }
    }

    Ok(())
}
