//! Configuration file loading
//!
//! Loads user configuration from `~/.config/peerlens/config.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{ConnectionConfig, SessionSettings, DEFAULT_ENDPOINT_BASE, DEFAULT_STUN_SERVER};
use crate::error::{PeerlensError, Result};
use crate::types::Facing;

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// ICE settings
    #[serde(default)]
    pub ice: IceSettings,

    /// Session settings
    #[serde(default)]
    pub session: SessionFileSettings,

    /// Capture settings
    #[serde(default)]
    pub capture: CaptureSettings,
}

/// ICE server list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceSettings {
    /// STUN/TURN urls
    #[serde(default = "default_ice_servers")]
    pub servers: Vec<String>,
}

/// Session defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFileSettings {
    /// Base URL the remote peer uses to reach this device
    #[serde(default = "default_endpoint_base")]
    pub endpoint_base: String,

    /// Preferred camera facing (front, back)
    #[serde(default = "default_facing")]
    pub facing: Facing,
}

/// Capture backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Facings of the virtual test-pattern devices, in enumeration order
    #[serde(default = "default_pattern_devices")]
    pub pattern_devices: Vec<Facing>,
}

fn default_ice_servers() -> Vec<String> {
    vec![DEFAULT_STUN_SERVER.to_string()]
}

fn default_endpoint_base() -> String {
    DEFAULT_ENDPOINT_BASE.to_string()
}

fn default_facing() -> Facing {
    Facing::Front
}

fn default_pattern_devices() -> Vec<Facing> {
    vec![Facing::Back, Facing::Front]
}

impl Default for IceSettings {
    fn default() -> Self {
        Self {
            servers: default_ice_servers(),
        }
    }
}

impl Default for SessionFileSettings {
    fn default() -> Self {
        Self {
            endpoint_base: default_endpoint_base(),
            facing: default_facing(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            pattern_devices: default_pattern_devices(),
        }
    }
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("peerlens").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("peerlens")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/peerlens/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| PeerlensError::config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PeerlensError::config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| PeerlensError::config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| PeerlensError::config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Negotiation policy built from the `[ice]` table
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.ice.servers.clone())
    }

    /// Session settings built from the `[session]` table
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::default()
            .with_endpoint_base(self.session.endpoint_base.clone())
            .with_default_facing(self.session.facing)
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# Peerlens Configuration

[ice]
# STUN/TURN servers used to discover network paths
servers = ["stun:stun.l.google.com:19302"]

[session]
# Base URL embedded in the scannable descriptor; "?id=<session>" is appended
endpoint_base = "https://peerlens.local/connect"

# Preferred camera: front or back (falls back to the first available camera)
facing = "front"

[capture]
# Virtual test-pattern cameras, in enumeration order
pattern_devices = ["back", "front"]
"#
    .to_string()
}
