//! Configuration schema for lvcache
//!
//! Configuration is stored at `~/.config/lvcache/config.toml`

use crate::cache::flush::{FlushPolicy, DEFAULT_POLL_INTERVAL};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Metadata storage
    pub metadata: MetadataConfig,

    /// Flush wait during cache removal
    pub flush: FlushConfig,

    /// Kernel device access
    pub device: DeviceConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Record cache operations in the journal
    pub journal: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            journal: true,
        }
    }
}

/// Where volume group metadata lives
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Metadata directory (default: `<state dir>/metadata`)
    pub dir: Option<PathBuf>,
}

/// Flush wait settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Seconds between dirty block checks
    pub poll_interval_secs: u64,

    /// Give up after this many seconds (default: wait forever)
    pub max_wait_secs: Option<u64>,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            max_wait_secs: None,
        }
    }
}

impl FlushConfig {
    pub fn policy(&self) -> FlushPolicy {
        FlushPolicy {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_wait: self.max_wait_secs.map(Duration::from_secs),
        }
    }
}

/// Device backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBackend {
    /// Real device-mapper devices via dmsetup
    #[default]
    Dmsetup,
    /// Log kernel operations without performing them
    Simulate,
}

/// Kernel device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub backend: DeviceBackend,

    /// dmsetup binary
    pub dmsetup: PathBuf,

    /// Command printing the table of a non-virtual LV
    pub table_generator: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: DeviceBackend::Dmsetup,
            dmsetup: PathBuf::from("dmsetup"),
            table_generator: None,
        }
    }
}
