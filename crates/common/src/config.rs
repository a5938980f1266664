//! Emulator configuration file model
//!
//! The configuration is a YAML document with a single `onvif` list; each entry
//! describes one emulated camera and the real backend it fronts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config file {0} does not define any onvif devices")]
    NoDevices(PathBuf),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// Root of the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmulatorConfig {
    #[serde(default)]
    pub onvif: Vec<DeviceConfig>,
}

/// One emulated ONVIF device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// MAC of the local interface whose IPv4 the device advertises
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Explicit IPv4 to bind and advertise; wins over `mac`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub ports: DevicePorts,
    pub name: String,
    pub uuid: Uuid,
    pub high_quality: StreamConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_quality: Option<StreamConfig>,
    pub target: TargetConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DevicePorts {
    pub server: u16,
    pub rtsp: u16,
    pub snapshot: u16,
}

/// One quality tier of the backend stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    pub rtsp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate: u32,
    /// Encoder quality reported by the real camera, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f32>,
}

/// The real camera or stream server the relays forward to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetConfig {
    pub hostname: String,
    #[serde(default)]
    pub ports: TargetPorts,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetPorts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtsp: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<u16>,
}

impl EmulatorConfig {
    /// Load and parse a YAML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if config.onvif.is_empty() {
            return Err(ConfigError::NoDevices(path.to_path_buf()));
        }

        tracing::debug!(
            path = %path.display(),
            devices = config.onvif.len(),
            "configuration loaded"
        );

        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}
