//! Wasmtime engine configuration and creation.
//!
//! The [`BridgeEngine`] is the foundation of the bridge. It is:
//! - Thread-safe and shared across all mounted instances
//! - Configured with async support so loading never blocks the embedder
//! - The single source of truth for which binary-format extensions are
//!   accepted (capability probing compiles against this exact engine)

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine, OptLevel};

use stage_bridge_common::{BridgeError, EngineConfig};

/// Thread-safe engine wrapper.
///
/// This struct wraps a Wasmtime [`Engine`] configured for long-lived
/// embedded instances. The engine is shared by every mount and contains no
/// per-instance state.
///
/// # Example
///
/// ```ignore
/// use stage_bridge_common::EngineConfig;
/// use stage_bridge_core::BridgeEngine;
///
/// let config = EngineConfig::default();
/// let engine = BridgeEngine::new(&config)?;
/// ```
#[derive(Clone)]
pub struct BridgeEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl BridgeEngine {
    /// Create a new engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the feature combination is invalid or the
    /// Wasmtime engine cannot be constructed.
    pub fn new(config: &EngineConfig) -> Result<Self, BridgeError> {
        // Reference types validate under bulk-memory semantics; accepting
        // one without the other is not a meaningful engine.
        if config.reference_types && !config.bulk_memory {
            return Err(BridgeError::validation(
                "'reference_types' requires 'bulk_memory'",
            ));
        }

        let mut wasmtime_config = Config::new();

        // Async support keeps instantiation and entry execution off the
        // embedder's thread of control.
        wasmtime_config.async_support(true);

        wasmtime_config.cranelift_opt_level(OptLevel::Speed);

        wasmtime_config.wasm_multi_value(config.multi_value);
        wasmtime_config.wasm_bulk_memory(config.bulk_memory);
        wasmtime_config.wasm_reference_types(config.reference_types);
        wasmtime_config.wasm_simd(config.simd);

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            BridgeError::validation(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            multi_value = config.multi_value,
            bulk_memory = config.bulk_memory,
            reference_types = config.reference_types,
            simd = config.simd,
            "Engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl std::fmt::Debug for BridgeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeEngine")
            .field("multi_value", &self.config.multi_value)
            .field("bulk_memory", &self.config.bulk_memory)
            .field("reference_types", &self.config.reference_types)
            .field("simd", &self.config.simd)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_creation_default() {
        let config = EngineConfig::default();
        let engine = BridgeEngine::new(&config);

        assert!(engine.is_ok());
        let engine = engine.unwrap();
        assert!(engine.config().simd);
    }

    #[test]
    fn test_engine_creation_without_simd() {
        let config = EngineConfig {
            simd: false,
            ..Default::default()
        };
        let engine = BridgeEngine::new(&config);

        assert!(engine.is_ok());
        assert!(!engine.unwrap().config().simd);
    }

    #[test]
    fn test_engine_rejects_invalid_feature_combination() {
        let config = EngineConfig {
            reference_types: true,
            bulk_memory: false,
            ..Default::default()
        };
        let result = BridgeEngine::new(&config);

        assert!(matches!(result, Err(BridgeError::Validation { .. })));
    }

    #[test]
    fn test_engine_debug() {
        let config = EngineConfig::default();
        let engine = BridgeEngine::new(&config).unwrap();

        let debug_str = format!("{engine:?}");
        assert!(debug_str.contains("BridgeEngine"));
        assert!(debug_str.contains("bulk_memory"));
    }
}
