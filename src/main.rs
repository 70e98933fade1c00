mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use paragliding::config::load_or_default;

use crate::commands::{config::ConfigArgs, start::StartArgs};

#[derive(Parser)]
#[command(author, version, about = "Paragliding track ticker server")]
struct Cli {
    /// Path to the configuration file. Defaults to ./.paragliding/config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server in the foreground
    Start(StartArgs),
    /// Update the stored configuration
    Config(ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { config, command } = Cli::parse();

    let (config, config_path) =
        load_or_default(config).context("failed to load configuration")?;
    logging::init(&config.logs_dir())?;

    match command {
        Commands::Start(args) => commands::start::execute(config, args).await?,
        Commands::Config(args) => commands::config::execute(config, &config_path, args)?,
    }

    Ok(())
}
