//! TOML configuration for the `hta` binary and library entry points.
//!
//! ```toml
//! [db]
//! path = "./data/hta.sqlite"
//!
//! [store]
//! timeout_ms = 5000
//! validation = "advisory"   # or "strict"
//!
//! [vector]                  # optional
//! collection = "hta_nodes"
//! dims = 384
//! timeout_ms = 5000
//!
//! [logging]
//! filter = "info"
//! json = false
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::path_store::{StoreOptions, ValidationPolicy};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub vector: Option<VectorConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub validation: ValidationPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            validation: ValidationPolicy::default(),
        }
    }
}

impl StoreConfig {
    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            validation: self.validation,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_collection")]
    pub collection: String,
    pub dims: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl VectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

fn default_timeout_ms() -> u64 {
    5000
}
fn default_collection() -> String {
    "hta_nodes".to_string()
}
fn default_filter() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.store.timeout_ms == 0 {
        anyhow::bail!("store.timeout_ms must be > 0");
    }

    if let Some(vector) = &config.vector {
        if vector.dims == 0 {
            anyhow::bail!("vector.dims must be > 0");
        }
        if vector.timeout_ms == 0 {
            anyhow::bail!("vector.timeout_ms must be > 0");
        }
        if vector.collection.trim().is_empty() {
            anyhow::bail!("vector.collection must not be empty");
        }
    }

    Ok(config)
}
