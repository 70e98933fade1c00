use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{Result, TrackError};

pub const DEFAULT_PORT: u16 = 8080;
pub const PORT_ENV: &str = "PORT";
pub const DEFAULT_TICKER_CAP: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Rocksdb,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Rocksdb => "rocksdb",
        }
    }
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_workers() -> usize {
    2
}

fn default_max_attempts() -> u8 {
    3
}

fn default_backoff_ms() -> u64 {
    1_000
}

fn default_dead_letter_capacity() -> usize {
    100
}

/// Outbound webhook delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            dead_letter_capacity: default_dead_letter_capacity(),
        }
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

fn default_ticker_cap() -> usize {
    DEFAULT_TICKER_CAP
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    #[serde(default)]
    pub storage: StorageBackend,
    #[serde(default = "default_ticker_cap")]
    pub ticker_cap: usize,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Config {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            port: DEFAULT_PORT,
            data_dir: default_data_dir(),
            storage: StorageBackend::default(),
            ticker_cap: DEFAULT_TICKER_CAP,
            delivery: DeliveryConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub storage: Option<StorageBackend>,
    pub ticker_cap: Option<usize>,
    pub delivery_timeout_ms: Option<u64>,
    pub delivery_max_attempts: Option<u8>,
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = env::current_dir().map_err(|err| TrackError::Config(err.to_string()))?;
    path.push(".paragliding");
    path.push("config.toml");
    Ok(path)
}

pub fn load_or_default(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let config_path = if let Some(path) = path {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        path
    } else {
        let path = default_config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        path
    };

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        let cfg: Config = toml::from_str(&contents)?;
        cfg.ensure_data_dir()?;
        Ok((cfg, config_path))
    } else {
        let cfg = Config::default();
        cfg.ensure_data_dir()?;
        cfg.save(&config_path)?;
        Ok((cfg, config_path))
    }
}

impl Config {
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_update(&mut self, update: ConfigUpdate) {
        if let Some(port) = update.port {
            self.port = port;
        }
        if let Some(dir) = update.data_dir {
            self.data_dir = dir;
        }
        if let Some(storage) = update.storage {
            self.storage = storage;
        }
        if let Some(cap) = update.ticker_cap {
            self.ticker_cap = cap;
        }
        if let Some(timeout_ms) = update.delivery_timeout_ms {
            self.delivery.timeout_ms = timeout_ms;
        }
        if let Some(max_attempts) = update.delivery_max_attempts {
            self.delivery.max_attempts = max_attempts;
        }
        self.updated_at = Utc::now();
    }

    /// Applies the `PORT` override using `lookup` to read variables.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(raw) = lookup(PORT_ENV) else {
            return Ok(());
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        self.port = trimmed.parse::<u16>().map_err(|err| {
            TrackError::Config(format!("invalid {PORT_ENV} value '{trimmed}': {err}"))
        })?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.ticker_cap == 0 {
            return Err(TrackError::Config(
                "ticker_cap must be at least 1".to_string(),
            ));
        }
        if self.delivery.queue_capacity == 0 {
            return Err(TrackError::Config(
                "delivery.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.delivery.workers == 0 {
            return Err(TrackError::Config(
                "delivery.workers must be at least 1".to_string(),
            ));
        }
        if self.delivery.max_attempts == 0 {
            return Err(TrackError::Config(
                "delivery.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ensure_data_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn track_store_path(&self) -> PathBuf {
        self.data_dir.join("tracks")
    }

    pub fn webhook_store_path(&self) -> PathBuf {
        self.data_dir.join("webhooks")
    }

    pub fn sequence_journal_path(&self) -> PathBuf {
        self.data_dir.join("sequence.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn default_data_dir() -> PathBuf {
    let Ok(current_dir) = env::current_dir() else {
        return PathBuf::from(".paragliding");
    };
    current_dir.join(".paragliding")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_and_reloads_config_file() -> Result<()> {
        let temp = TempDir::new().expect("create temp dir");
        let path = temp.path().join("nested").join("config.toml");

        let (mut config, saved_path) = load_or_default(Some(path.clone()))?;
        assert_eq!(saved_path, path);
        assert!(path.exists());
        assert_eq!(config.ticker_cap, DEFAULT_TICKER_CAP);

        config.data_dir = temp.path().join("data");
        config.apply_update(ConfigUpdate {
            port: Some(9191),
            storage: Some(StorageBackend::Rocksdb),
            delivery_max_attempts: Some(7),
            ..ConfigUpdate::default()
        });
        config.save(&path)?;

        let (reloaded, _) = load_or_default(Some(path))?;
        assert_eq!(reloaded.port, 9191);
        assert_eq!(reloaded.storage, StorageBackend::Rocksdb);
        assert_eq!(reloaded.delivery.max_attempts, 7);
        assert!(reloaded.data_dir.exists());
        Ok(())
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() -> Result<()> {
        let contents = r#"
            port = 7000
            data_dir = "/tmp/paragliding"
            created_at = "2018-10-01T00:00:00Z"
            updated_at = "2018-10-01T00:00:00Z"
        "#;
        let config: Config = toml::from_str(contents)?;
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.ticker_cap, DEFAULT_TICKER_CAP);
        assert_eq!(config.delivery, DeliveryConfig::default());
        Ok(())
    }

    #[test]
    fn port_env_overrides_configured_port() -> Result<()> {
        let mut config = Config::default();
        config.apply_env_from(|name| (name == PORT_ENV).then(|| " 4242 ".to_string()))?;
        assert_eq!(config.port, 4242);

        config.apply_env_from(|_| None)?;
        assert_eq!(config.port, 4242);

        let err = config
            .apply_env_from(|_| Some("eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, TrackError::Config(_)));
        Ok(())
    }

    #[test]
    fn validate_rejects_zero_sized_settings() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.delivery.workers = 0;
        assert!(config.validate().is_err());
    }
}
