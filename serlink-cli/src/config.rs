//! Configuration file support for serlink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SERLINK_*)
//! 3. Local config file (./serlink.toml)
//! 4. Global config file (~/.config/serlink/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serlink::{LineConfig, Parity, ServiceKind, StopBits};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the local config file.
const LOCAL_CONFIG: &str = "serlink.toml";

/// Session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSection {
    /// Session name reported in status events.
    pub name: Option<String>,
    /// Frame parser id.
    pub parser: Option<String>,
    /// Open automatically and reconnect after a disconnect.
    pub auto_open: Option<bool>,
    /// Delay before retrying when no device is found.
    pub reconnect_delay_ms: Option<u64>,
}

/// Port selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortSection {
    /// Fixed serial port (e.g., "/dev/ttyUSB0" or "COM3"), skips discovery.
    pub serial: Option<String>,
    /// Device service kind used for discovery.
    pub service: Option<ServiceKind>,
    /// Number of matching devices to skip.
    pub skip: Option<usize>,
}

/// Line parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineSection {
    /// Baud rate.
    pub baud: Option<u32>,
    /// Parity.
    pub parity: Option<Parity>,
    /// Stop bits.
    pub stop_bits: Option<StopBits>,
    /// Data bits.
    pub data_bits: Option<u8>,
    /// Read timeout in milliseconds.
    pub read_timeout_ms: Option<u64>,
    /// Write timeout in milliseconds.
    pub write_timeout_ms: Option<u64>,
}

impl LineSection {
    /// Line parameters with unset fields at their defaults.
    pub fn to_line_config(&self) -> LineConfig {
        let mut line = LineConfig::default();
        if let Some(baud) = self.baud {
            line.baud_rate = baud;
        }
        if let Some(parity) = self.parity {
            line.parity = parity;
        }
        if let Some(stop_bits) = self.stop_bits {
            line.stop_bits = stop_bits;
        }
        if let Some(data_bits) = self.data_bits {
            line.data_bits = data_bits;
        }
        if let Some(ms) = self.read_timeout_ms {
            line.read_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.write_timeout_ms {
            line.write_timeout = Duration::from_millis(ms);
        }
        line
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session configuration.
    #[serde(default)]
    pub session: SessionSection,
    /// Port selection.
    #[serde(default)]
    pub port: PortSection,
    /// Line parameters.
    #[serde(default)]
    pub line: LineSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
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

    /// Load configuration from a specific file.
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
        ProjectDirs::from("", "", "serlink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one, field by field.
    fn merge(&mut self, other: Self) {
        let Self {
            session,
            port,
            line,
        } = other;

        // Session
        merge_opt(&mut self.session.name, session.name);
        merge_opt(&mut self.session.parser, session.parser);
        merge_opt(&mut self.session.auto_open, session.auto_open);
        merge_opt(&mut self.session.reconnect_delay_ms, session.reconnect_delay_ms);

        // Port
        merge_opt(&mut self.port.serial, port.serial);
        merge_opt(&mut self.port.service, port.service);
        merge_opt(&mut self.port.skip, port.skip);

        // Line
        merge_opt(&mut self.line.baud, line.baud);
        merge_opt(&mut self.line.parity, line.parity);
        merge_opt(&mut self.line.stop_bits, line.stop_bits);
        merge_opt(&mut self.line.data_bits, line.data_bits);
        merge_opt(&mut self.line.read_timeout_ms, line.read_timeout_ms);
        merge_opt(&mut self.line.write_timeout_ms, line.write_timeout_ms);
    }
}

fn merge_opt<T>(base: &mut Option<T>, other: Option<T>) {
    if other.is_some() {
        *base = other;
    }
}
