//! Seedcast CLI - stream torrents into a media player
//!
//! Provides command-line access to Seedcast functionality.

mod commands;

use clap::Parser;
use seedcast_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "seedcast")]
#[command(about = "Stream torrents through an external engine into a media player")]
struct Cli {
    /// Console log level; the full trace always goes to logs/
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.log_level.as_tracing_level(), None) {
        eprintln!("Logging disabled: {}", e.user_message());
    }

    commands::handle_command(cli.command).await
}
