use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;
use shopsearch_api::observability::LogConfig;
use shopsearch_core::ResilienceSettings;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LogConfig,
    pub store: StoreConfig,
    /// JSON product catalog; the built-in sample is used when unset.
    pub catalog_path: Option<PathBuf>,
    pub resilience: ResilienceSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub permissive_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            permissive_cors: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Shared Redis instance. Without it the process keeps state in memory.
    pub redis_url: Option<String>,
    pub scan_batch_size: usize,
    pub cleanup_interval_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            scan_batch_size: 500,
            cleanup_interval_seconds: 60,
        }
    }
}

impl StoreConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds.max(1))
    }
}

impl Config {
    /// `config/default` → `config/local` → `SHOPSEARCH__*` environment variables.
    pub fn load() -> Result<Self> {
        let loader = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("SHOPSEARCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_loader(loader)
    }

    fn from_loader(loader: ConfigLoader) -> Result<Self> {
        let config: Self = loader.try_deserialize()?;
        config
            .resilience
            .check()
            .context("invalid resilience settings")?;
        Ok(config)
    }
}
