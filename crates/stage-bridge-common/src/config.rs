//! Configuration structures for stage-bridge.
//!
//! This module defines configuration at two scopes:
//! - [`BridgeConfig`]: process-level settings ([`EngineConfig`] + [`LoaderConfig`])
//! - [`InstanceConfig`]: per-instance options, immutable once an instance exists
//!
//! Instance options form a closed set: deserialization rejects unknown keys
//! so caller typos surface as validation errors instead of being ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Process-level bridge configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Engine configuration (wasm feature toggles).
    #[serde(default)]
    pub engine: EngineConfig,

    /// Module loader configuration.
    #[serde(default)]
    pub loader: LoaderConfig,
}

/// Engine configuration.
///
/// These toggles decide which binary-format extensions the engine accepts.
/// The capability prober reports against the engine actually built from
/// this configuration, so disabling a mandatory feature here makes the
/// whole bridge probe as unsupported.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Accept modules using multi-value results.
    #[serde(default = "defaults::enabled")]
    pub multi_value: bool,

    /// Accept modules using bulk memory operations.
    #[serde(default = "defaults::enabled")]
    pub bulk_memory: bool,

    /// Accept modules using reference types.
    #[serde(default = "defaults::enabled")]
    pub reference_types: bool,

    /// Accept modules using 128-bit SIMD.
    ///
    /// SIMD is optional: engines built without it still probe as supported.
    #[serde(default = "defaults::enabled")]
    pub simd: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            multi_value: defaults::enabled(),
            bulk_memory: defaults::enabled(),
            reference_types: defaults::enabled(),
            simd: defaults::enabled(),
        }
    }
}

/// Module loader configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoaderConfig {
    /// Allow fetching modules over http(s).
    ///
    /// When disabled, only local filesystem locations resolve.
    #[serde(default = "defaults::allow_network")]
    pub allow_network: bool,

    /// Upper bound on fetched module size in bytes.
    #[serde(default = "defaults::max_module_bytes")]
    pub max_module_bytes: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            allow_network: defaults::allow_network(),
            max_module_bytes: defaults::max_module_bytes(),
        }
    }
}

/// Autoplay policy for a mounted instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoplayPolicy {
    /// Start running as soon as the load completes.
    #[default]
    Auto,
    /// Always start running, even where the host would prefer not to.
    On,
    /// Load but stay suspended until explicitly resumed.
    Off,
}

/// Per-instance configuration.
///
/// Supplied at mount time and immutable afterwards. The option set is
/// closed: unknown keys fail deserialization (`deny_unknown_fields`), and
/// [`InstanceConfig::validate`] checks the semantic constraints before any
/// load work starts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    /// Location of the compiled engine module (URL or filesystem path).
    pub source: String,

    /// Autoplay policy.
    #[serde(default)]
    pub autoplay: AutoplayPolicy,

    /// Base path for resolving the engine's relative asset references.
    #[serde(default)]
    pub base_path: Option<String>,

    /// Name of the module's exported entry function.
    #[serde(default = "defaults::entry_point")]
    pub entry_point: String,

    /// Opaque key-value parameters forwarded to the engine instance.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl InstanceConfig {
    /// Create a configuration for the given module location with defaults
    /// for every option.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            autoplay: AutoplayPolicy::default(),
            base_path: None,
            entry_point: defaults::entry_point(),
            parameters: BTreeMap::new(),
        }
    }

    /// Parse a configuration from embedder-supplied JSON.
    ///
    /// Unknown keys are rejected rather than silently ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] if the JSON does not describe a
    /// valid configuration.
    pub fn from_json(json: &str) -> Result<Self, BridgeError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BridgeError::validation(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the semantic constraints on this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] describing the first violated
    /// constraint.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.source.trim().is_empty() {
            return Err(BridgeError::validation("'source' must not be empty"));
        }
        if self.entry_point.trim().is_empty() {
            return Err(BridgeError::validation("'entry_point' must not be empty"));
        }
        if let Some(base) = &self.base_path {
            if base.trim().is_empty() {
                return Err(BridgeError::validation(
                    "'base_path' must not be empty when present",
                ));
            }
        }
        Ok(())
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn enabled() -> bool {
        true
    }

    pub const fn allow_network() -> bool {
        true
    }

    pub const fn max_module_bytes() -> u64 {
        64 * 1024 * 1024
    }

    pub fn entry_point() -> String {
        "_start".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();

        assert!(config.engine.multi_value);
        assert!(config.engine.bulk_memory);
        assert!(config.engine.reference_types);
        assert!(config.engine.simd);

        assert!(config.loader.allow_network);
        assert_eq!(config.loader.max_module_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn test_instance_config_defaults() {
        let config = InstanceConfig::new("./engine.wasm");

        assert_eq!(config.source, "./engine.wasm");
        assert_eq!(config.autoplay, AutoplayPolicy::Auto);
        assert!(config.base_path.is_none());
        assert_eq!(config.entry_point, "_start");
        assert!(config.parameters.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_instance_config_from_json() {
        let json = r#"{
            "source": "https://cdn.example/engine.wasm",
            "autoplay": "off",
            "base_path": "/assets"
        }"#;

        let config = InstanceConfig::from_json(json).unwrap();

        assert_eq!(config.source, "https://cdn.example/engine.wasm");
        assert_eq!(config.autoplay, AutoplayPolicy::Off);
        assert_eq!(config.base_path.as_deref(), Some("/assets"));
        // Defaults applied
        assert_eq!(config.entry_point, "_start");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let json = r#"{"source": "./engine.wasm", "looop": true}"#;
        let err = InstanceConfig::from_json(json).unwrap_err();

        assert!(err.is_validation(), "expected validation error, got {err:?}");
    }

    #[test]
    fn test_empty_source_rejected() {
        let config = InstanceConfig::new("   ");
        let err = config.validate().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_empty_entry_point_rejected() {
        let mut config = InstanceConfig::new("./engine.wasm");
        config.entry_point = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = BridgeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: BridgeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.engine.simd, deserialized.engine.simd);
        assert_eq!(
            config.loader.max_module_bytes,
            deserialized.loader.max_module_bytes
        );
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"engine": {"simd": false}}"#;
        let config: BridgeConfig = serde_json::from_str(json).unwrap();

        // Explicitly set value
        assert!(!config.engine.simd);
        // Default values for unspecified fields
        assert!(config.engine.bulk_memory);
        assert!(config.loader.allow_network);
    }
}
