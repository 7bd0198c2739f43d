//! Configuration management for vtelnet.
//!
//! Settings are loaded from `~/.vtelnet/config.toml`; a missing or broken
//! file falls back to the defaults. Command line arguments override
//! whatever the file says.
//!
//! # Configuration File
//!
//! ```toml
//! # trace, debug, info, warn, error
//! log_level = "info"
//!
//! [connection]
//! host = "localhost"
//! port = 23
//! # Connect and I/O timeout, and the shortest wait
//! timeout_secs = 10
//!
//! [screen]
//! width = 80
//! height = 24
//! # 0 for zero-based coordinates, 1 for one-based
//! coordinate_offset = 0
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ConnectionSettings;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log filter directive for `~/.vtelnet/vtelnet.log`
    pub log_level: String,
    pub connection: ConnectionConfig,
    pub screen: ScreenConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            connection: ConnectionConfig::default(),
            screen: ScreenConfig::default(),
        }
    }
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 23,
            timeout_secs: 10,
        }
    }
}

/// Virtual screen configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub width: u16,
    pub height: u16,
    pub coordinate_offset: usize,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: 80,
            height: 24,
            coordinate_offset: 0,
        }
    }
}

impl Config {
    /// Load configuration from `~/.vtelnet/config.toml`
    pub fn load() -> Self {
        match Self::get_config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from a file, defaults on any error
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save configuration to `~/.vtelnet/config.toml`
    pub fn save(&self) -> Result<(), String> {
        match Self::get_config_path() {
            Some(path) => self.save_to(&path),
            None => Err("Could not determine config path".to_string()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))
    }

    /// Settings for a new connection
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            host: self.connection.host.clone(),
            port: self.connection.port,
            timeout: Duration::from_secs(self.connection.timeout_secs),
            width: self.screen.width,
            height: self.screen.height,
            x_offset: self.screen.coordinate_offset,
            y_offset: self.screen.coordinate_offset,
        }
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("config.toml"))
    }
}

/// `~/.vtelnet`, created on first use
pub fn config_dir() -> Option<PathBuf> {
    let dir = home_dir()?.join(".vtelnet");
    if !dir.exists() {
        let _ = fs::create_dir_all(&dir);
    }
    Some(dir)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
