//! kbchat CLI — the main entry point.
//!
//! Commands:
//! - `serve`      — Start the HTTP/WebSocket server
//! - `chat`       — Interactive chat in the terminal
//! - `knowledge`  — Add or list knowledge entries
//! - `doctor`     — Check configuration and backend readiness
//! - `init`       — Write a default config file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "kbchat",
    about = "kbchat — knowledge-base chat server",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.kbchat/config.toml)
    #[arg(short, long, global = true, env = "KBCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP and WebSocket server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with the model in the terminal
    Chat {
        /// Knowledge category to ground the conversation in
        #[arg(short = 'k', long)]
        category: Option<String>,
    },

    /// Manage the knowledge base
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },

    /// Check configuration and backend readiness
    Doctor,

    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum KnowledgeAction {
    /// Add an entry
    Add {
        content: String,
        #[arg(short = 'k', long)]
        category: Option<String>,
    },
    /// List entries, optionally for one category
    List {
        #[arg(short = 'k', long)]
        category: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port } => commands::serve::run(config_path, port).await?,
        Commands::Chat { category } => commands::chat::run(config_path, category).await?,
        Commands::Knowledge { action } => match action {
            KnowledgeAction::Add { content, category } => {
                commands::knowledge::add(config_path, &content, category.as_deref()).await?
            }
            KnowledgeAction::List { category } => {
                commands::knowledge::list(config_path, category.as_deref()).await?
            }
        },
        Commands::Doctor => commands::doctor::run(config_path).await?,
        Commands::Init { force } => commands::init::run(config_path, force).await?,
    }

    Ok(())
}
