//! agrag CLI: the main entry point.
//!
//! Commands:
//! - `serve`: Start the HTTP/SSE gateway
//! - `ask`: Run one turn against an agent and print its events
//! - `agents`: List configured agents and their endpoints
//! - `init`: Write a default config file

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "agrag",
    about = "agrag: agentic multi-query RAG service",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.agrag/config.toml)
    #[arg(short, long, global = true, env = "AGRAG_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send one message to an agent
    Ask {
        /// Agent name or endpoint path
        #[arg(short, long, default_value = "coordinator")]
        agent: String,

        /// The message
        message: String,
    },

    /// List configured agents
    Agents,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port } => commands::serve::run(config_path, port).await?,
        Commands::Ask { agent, message } => {
            commands::ask::run(config_path, &agent, &message).await?
        }
        Commands::Agents => commands::agents::run(config_path)?,
        Commands::Init { force } => commands::init::run(config_path, force)?,
    }

    Ok(())
}
