//! # Configuration
//!
//! TOML configuration for the position logger. Every field has a default, so the logger
//! runs without a config file at all.
//!
//! ```toml
//! [meshtastic]
//! port = "auto"            # or e.g. "/dev/ttyUSB0"
//! baud_rate = 115200
//! heartbeat_interval_secs = 300
//!
//! [storage]
//! output_file = "mesh_positions.json"
//!
//! [logging]
//! level = "info"
//! # file = "meshpos.log"
//! ```

use anyhow::{anyhow, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use tokio::fs;

/// Port value that requests auto-detection of the first USB serial device.
pub const AUTO_PORT: &str = "auto";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub meshtastic: MeshtasticConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshtasticConfig {
    /// Serial device path. Empty or `"auto"` picks the first USB serial port found.
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Seconds between keepalive heartbeats sent to the device (0 disables).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_port() -> String {
    AUTO_PORT.to_string()
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_heartbeat_interval_secs() -> u64 {
    300
}

impl MeshtasticConfig {
    /// True when the port should be discovered rather than opened by name.
    pub fn auto_detect(&self) -> bool {
        let p = self.port.trim();
        p.is_empty() || p.eq_ignore_ascii_case(AUTO_PORT)
    }
}

impl Default for MeshtasticConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding the last known position of every node.
    #[serde(default = "default_output_file")]
    pub output_file: String,
}

fn default_output_file() -> String {
    "mesh_positions.json".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_file: default_output_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Load `path`, or fall back to defaults when the file does not exist.
    /// A file that exists but fails to parse is still an error.
    pub async fn load_or_default(path: &str) -> Result<Self> {
        match fs::metadata(path).await {
            Ok(_) => Self::load(path).await,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config file at {}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(anyhow!("Failed to access config file {}: {}", path, e)),
        }
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}
