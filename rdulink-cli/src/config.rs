//! Configuration file support for rdulink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (RDULINK_*)
//! 3. Local config file (./rdulink.toml)
//! 4. Global config file (~/.config/rdulink/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use rdulink::XmodemConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::OutputFormat;

/// Image size used when neither the command line nor a config file sets one.
pub const DEFAULT_IMAGE_SIZE: u32 = 0x1_0000;

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Transfer defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Use Xmodem for `send` unless told otherwise.
    #[serde(default)]
    pub xmodem: bool,
    /// Record format for generated output.
    pub format: Option<OutputFormat>,
    /// Data bytes per generated record.
    pub chunk_size: Option<usize>,
    /// Xmodem attempts per packet before the session aborts.
    pub retry_budget: Option<u8>,
    /// Xmodem response timeout in milliseconds: how long `send` waits for
    /// ACK or the receiver's start request, and how long `receive` waits
    /// for a packet before requesting it again. The per-byte gap inside a
    /// packet keeps its default.
    pub timeout_ms: Option<u32>,
}

/// Memory image layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Record address that maps to the first image byte.
    pub base: Option<u32>,
    /// Image size in bytes.
    pub size: Option<u32>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Transfer configuration.
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Memory configuration.
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new("rdulink.toml")) {
            debug!("Loaded local config from rdulink.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "rdulink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.port.connection.serial.is_some() {
            self.port.connection.serial = other.port.connection.serial;
        }
        if other.port.connection.baud.is_some() {
            self.port.connection.baud = other.port.connection.baud;
        }

        if other.transfer.xmodem {
            self.transfer.xmodem = true;
        }
        if other.transfer.format.is_some() {
            self.transfer.format = other.transfer.format;
        }
        if other.transfer.chunk_size.is_some() {
            self.transfer.chunk_size = other.transfer.chunk_size;
        }
        if other.transfer.retry_budget.is_some() {
            self.transfer.retry_budget = other.transfer.retry_budget;
        }
        if other.transfer.timeout_ms.is_some() {
            self.transfer.timeout_ms = other.transfer.timeout_ms;
        }

        if other.memory.base.is_some() {
            self.memory.base = other.memory.base;
        }
        if other.memory.size.is_some() {
            self.memory.size = other.memory.size;
        }
    }

    /// Xmodem settings with the configured overrides applied.
    pub fn xmodem_config(&self) -> XmodemConfig {
        let mut xmodem = XmodemConfig::default();
        if let Some(budget) = self.transfer.retry_budget {
            xmodem.retry_budget = budget.max(1);
        }
        if let Some(timeout) = self.transfer.timeout_ms {
            xmodem.ack_timeout = timeout;
            xmodem.ready_timeout = timeout;
            xmodem.start_timeout = timeout;
        }
        xmodem
    }

    /// Record address of the first image byte.
    pub fn image_base(&self) -> u32 {
        self.memory.base.unwrap_or(0)
    }

    /// Image size in bytes.
    pub fn image_size(&self) -> u32 {
        self.memory.size.unwrap_or(DEFAULT_IMAGE_SIZE)
    }
}
