//! Configuration file structures for the host harness.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: top-level configuration file structure
//! - [`MountEntry`]: a mount to establish at startup

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{AutoplayPolicy, BridgeConfig, InstanceConfig};

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [bridge.engine]
/// simd = true
///
/// [bridge.loader]
/// allow_network = false
///
/// [[mounts]]
/// mount = "stage-a"
/// source = "./modules/engine.wasm"
/// autoplay = "off"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Bridge configuration (engine + loader settings).
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Mounts to establish at startup.
    #[serde(default)]
    pub mounts: Vec<MountEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// A mount to establish at startup.
///
/// Mirrors the recognized instance options plus the mount identifier.
/// `deny_unknown_fields` does not compose with `serde(flatten)`, so the
/// option fields are spelled out here and converted via
/// [`MountEntry::instance_config`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MountEntry {
    /// Mount identifier, unique within the file.
    pub mount: String,

    /// Location of the compiled engine module.
    pub source: String,

    /// Autoplay policy.
    #[serde(default)]
    pub autoplay: AutoplayPolicy,

    /// Base path for relative asset resolution.
    #[serde(default)]
    pub base_path: Option<String>,

    /// Entry function override.
    #[serde(default)]
    pub entry_point: Option<String>,
}

impl MountEntry {
    /// Expand this entry into an [`InstanceConfig`].
    pub fn instance_config(&self) -> InstanceConfig {
        let mut config = InstanceConfig::new(self.source.clone());
        config.autoplay = self.autoplay;
        config.base_path = self.base_path.clone();
        if let Some(entry) = &self.entry_point {
            config.entry_point = entry.clone();
        }
        config
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}
