//! pollbridge CLI, the main entry point.
//!
//! Commands:
//! - `serve`   Start the HTTP gateway (webhook, health, task API)
//! - `chat`    Ask questions through the task registry from the terminal
//! - `tools`   List tool servers and their tools, or call one tool
//! - `status`  Show the effective configuration, secrets masked
//! - `config`  Print a configuration template

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "pollbridge",
    about = "pollbridge: streaming agent answers over request/response webhooks",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.pollbridge/config.toml)
    #[arg(short, long, global = true, env = "POLLBRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask the agent from the terminal
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List tools on every configured server, or call one
    Tools {
        /// Tool to invoke
        #[arg(long)]
        call: Option<String>,

        /// JSON arguments for --call
        #[arg(long, requires = "call")]
        args: Option<String>,
    },

    /// Show configuration status
    Status,

    /// Print a configuration template
    Config {
        /// Print the config file location instead
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

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
        Commands::Chat { message } => commands::chat::run(config_path, message).await?,
        Commands::Tools { call, args } => commands::tools::run(config_path, call, args).await?,
        Commands::Status => commands::status::run(config_path)?,
        Commands::Config { path } => commands::config_cmd::run(path),
    }

    Ok(())
}
