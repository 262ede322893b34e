//! Peerlens CLI
//!
//! Share a camera with another device through a scannable descriptor.
//!
//! # Usage
//!
//! ```bash
//! # List capture devices
//! peerlens devices
//!
//! # Start a session and print its descriptor payload
//! peerlens start --facing front
//!
//! # Inspect a payload read from the other device
//! peerlens decode 'v1|sess_abc123|https://host/connect?id=sess_abc123'
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Peerlens - peer-to-peer camera sessions without a signaling server
#[derive(Parser)]
#[command(name = "peerlens")]
#[command(version)]
#[command(about = "Peer-to-peer camera sessions without a signaling server", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available capture devices
    #[command(alias = "ls")]
    Devices,

    /// Start a session and print its descriptor payload
    Start(commands::StartArgs),

    /// Decode a descriptor payload
    Decode(commands::DecodeArgs),

    /// Manage the configuration file
    Config(commands::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(format!("peerlens={}", level).parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Devices => commands::devices().await?,
        Commands::Start(args) => commands::start(args).await?,
        Commands::Decode(args) => commands::decode(args).await?,
        Commands::Config(args) => commands::config(args).await?,
    }

    Ok(())
}
