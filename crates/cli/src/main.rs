//! quillvault CLI — the main entry point.
//!
//! Commands:
//! - `onboard`    — Initialize the config file
//! - `chat`       — Interactive session against the local model
//! - `summarize`  — Summarize a document from disk

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "quillvault",
    about = "quillvault — on-device document vault assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the model (preset alias or path to a .gguf file)
    #[arg(short, long, global = true)]
    model: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the configuration file
    Onboard,

    /// Chat with the vault assistant
    Chat {
        /// Reply at length instead of briefly
        #[arg(long)]
        detailed: bool,

        /// Leave prior turns out of every prompt
        #[arg(long)]
        no_history: bool,
    },

    /// Summarize a document
    Summarize {
        /// Path to a plain-text document
        path: std::path::PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run()?,
        Commands::Chat {
            detailed,
            no_history,
        } => commands::chat::run(cli.model, detailed, no_history).await?,
        Commands::Summarize { path } => commands::summarize::run(cli.model, &path).await?,
    }

    Ok(())
}
