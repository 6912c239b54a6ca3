//! Configuration management for lvcache

pub mod schema;

pub use schema::Config;

use crate::error::{LvCacheError, LvCacheResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lvcache")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lvcache")
    }

    /// Directory holding one metadata file per volume group
    pub fn metadata_dir(config: &Config) -> PathBuf {
        config
            .metadata
            .dir
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("metadata"))
    }

    /// Journal of cache operations, kept next to the metadata it describes
    pub fn journal_path(config: &Config) -> PathBuf {
        Self::metadata_dir(config).join("journal.log")
    }

    /// Load configuration, falling back to defaults if the file is missing
    pub async fn load(&self) -> LvCacheResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> LvCacheResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| LvCacheError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| LvCacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> LvCacheResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| LvCacheError::DirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            LvCacheError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the metadata directory exists
    pub async fn ensure_state_dirs(config: &Config) -> LvCacheResult<()> {
        let dir = Self::metadata_dir(config);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| LvCacheError::DirCreate { path: dir, source: e })
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
