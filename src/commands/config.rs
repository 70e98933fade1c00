use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use paragliding::config::{Config, ConfigUpdate};

use super::start::StorageArg;

#[derive(Args, Default)]
pub struct ConfigArgs {
    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub storage: Option<StorageArg>,

    /// Window size used by the ticker endpoints
    #[arg(long)]
    pub ticker_cap: Option<usize>,

    #[arg(long = "delivery-timeout-ms")]
    pub delivery_timeout_ms: Option<u64>,

    #[arg(long = "delivery-max-attempts")]
    pub delivery_max_attempts: Option<u8>,
}

pub fn execute(mut config: Config, path: &Path, args: ConfigArgs) -> Result<()> {
    let ConfigArgs {
        port,
        data_dir,
        storage,
        ticker_cap,
        delivery_timeout_ms,
        delivery_max_attempts,
    } = args;

    config.apply_update(ConfigUpdate {
        port,
        data_dir,
        storage: storage.map(Into::into),
        ticker_cap,
        delivery_timeout_ms,
        delivery_max_attempts,
    });
    config.validate().context("refusing to save invalid configuration")?;

    config.ensure_data_dir()?;
    config.save(path)?;

    tracing::info!("Configuration saved to {}", path.display());
    Ok(())
}
