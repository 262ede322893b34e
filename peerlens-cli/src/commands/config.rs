//! Config command - manage configuration files

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use peerlens_core::config::{sample_config, ConfigFile};

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the path to the config file
    Path,

    /// Show the current configuration
    Show,

    /// Generate a default config file
    Init {
        /// Force overwrite if file exists
        #[arg(short, long)]
        force: bool,
    },

    /// Print a sample configuration to stdout
    Sample,
}

/// Run config subcommand
pub async fn config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Path => {
            let path = ConfigFile::default_path();
            println!("{}", path.display());
            if path.exists() {
                println!("(file exists)");
            } else {
                println!("(file does not exist)");
            }
        }
        ConfigCommand::Show => {
            let path = ConfigFile::default_path();
            if !path.exists() {
                println!("No configuration file found at: {}", path.display());
                println!();
                println!("Using default settings. Create a config file with:");
                println!("  peerlens config init");
                return Ok(());
            }

            let config = ConfigFile::load_from(&path).context("Failed to load config file")?;

            println!("Configuration file: {}\n", path.display());
            println!("ICE servers:");
            for server in &config.ice.servers {
                println!("  {}", server);
            }
            println!("Endpoint base:   {}", config.session.endpoint_base);
            println!("Default facing:  {}", config.session.facing);
            let devices: Vec<String> = config
                .capture
                .pattern_devices
                .iter()
                .map(|f| f.to_string())
                .collect();
            println!("Pattern devices: {}", devices.join(", "));
        }
        ConfigCommand::Init { force } => {
            let path = ConfigFile::default_path();

            if path.exists() && !force {
                println!("Configuration file already exists: {}", path.display());
                println!();
                println!("Use --force to overwrite, or edit the existing file.");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent).context("Failed to create config directory")?;
                }
            }

            std::fs::write(&path, sample_config()).context("Failed to write config file")?;

            println!("Created configuration file: {}", path.display());
            println!();
            println!("Edit this file to set ICE servers, the endpoint base and the preferred camera.");
        }
        ConfigCommand::Sample => {
            print!("{}", sample_config());
        }
    }

    Ok(())
}
