use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use paragliding::{
    config::{Config, ConfigUpdate, StorageBackend},
    server,
};

#[derive(Args, Clone, Default)]
pub struct StartArgs {
    /// Override the configured server port (takes precedence over $PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Override the configured data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Override the configured storage backend
    #[arg(long, value_enum)]
    pub storage: Option<StorageArg>,
}

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
pub enum StorageArg {
    #[value(alias = "mem")]
    Memory,
    #[value(alias = "rocks")]
    Rocksdb,
}

impl From<StorageArg> for StorageBackend {
    fn from(value: StorageArg) -> Self {
        match value {
            StorageArg::Memory => StorageBackend::Memory,
            StorageArg::Rocksdb => StorageBackend::Rocksdb,
        }
    }
}

pub async fn execute(config: Config, args: StartArgs) -> Result<()> {
    let config = runtime_config(config, args, |name| std::env::var(name).ok())?;
    config.ensure_data_dir()?;
    server::run(config)
        .await
        .context("paragliding server exited with an error")
}

/// Layers overrides onto the file configuration: CLI flags beat the
/// environment, which beats the file. Nothing here is written back.
fn runtime_config<F>(mut config: Config, args: StartArgs, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    config
        .apply_env_from(lookup)
        .context("invalid environment override")?;
    config.apply_update(ConfigUpdate {
        port: args.port,
        data_dir: args.data_dir,
        storage: args.storage.map(StorageBackend::from),
        ..ConfigUpdate::default()
    });
    Ok(config)
}
