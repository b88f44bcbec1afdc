//! Common types, errors, and configuration for stage-bridge.
//!
//! This crate provides shared functionality used across the stage-bridge workspace:
//! - Error taxonomy using `thiserror` for type-safe error handling
//! - Configuration structures for the bridge and for individual instances
//! - TOML configuration file loading for the host harness

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{AutoplayPolicy, BridgeConfig, EngineConfig, InstanceConfig, LoaderConfig};
pub use error::{BridgeError, LoadError};
