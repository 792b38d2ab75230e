//! tandem CLI
//!
//! Command-line client for a tandem sync server: watch a room's session
//! status or drop a cursor chat message into it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tandem_core::Config;

mod commands;
mod logging;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "tandem - live document sync client")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print each session status change until Ctrl-C
    Status {
        /// Room to join (defaults to room_id from config)
        #[arg(short, long)]
        room: Option<String>,

        /// Exit once the session has loaded or failed
        #[arg(long)]
        once: bool,
    },
    /// Show a cursor chat message to everyone in the room
    Chat {
        /// Message text (truncated to 64 characters)
        message: String,

        /// Room to join (defaults to room_id from config)
        #[arg(short, long)]
        room: Option<String>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (server_url, room_id, user.name, session.ping_interval_ms, ...)
        key: String,
        /// Configuration value; empty clears optional keys
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_deref();

    // Config commands don't connect anywhere
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, &output);
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    logging::init(&config);

    match cli.command {
        Commands::Status { room, once } => {
            commands::status::watch(&config, room, once, &output).await
        }
        Commands::Chat { message, room } => {
            commands::chat::send(&config, &message, room, &output).await
        }
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&std::path::Path>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(&key, &value, config_path, output)
        }
    }
}
