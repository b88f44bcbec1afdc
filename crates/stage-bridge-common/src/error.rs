//! Error types for stage-bridge.
//!
//! This module defines the public error taxonomy using `thiserror`:
//! - [`BridgeError`]: errors surfaced to embedding code through the facade
//! - [`LoadError`]: errors from fetching and instantiating the binary module
//!
//! Only load errors are worth retrying; everything else reports a mistake
//! that a retry cannot fix (bad configuration, missing host features, or an
//! operation against an instance that no longer accepts it).

use thiserror::Error;

/// Errors surfaced to embedding code.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The host environment lacks mandatory binary-format features.
    ///
    /// Raised before any load attempt. Non-retryable on this host.
    #[error("Host environment unsupported, missing features: {}", .missing.join(", "))]
    Unsupported {
        /// Names of the mandatory features that probed as unavailable.
        missing: Vec<String>,
    },

    /// Fetching or instantiating the binary module failed.
    #[error("Load failed: {0}")]
    Load(#[source] LoadError),

    /// The supplied configuration was rejected.
    ///
    /// Validation happens synchronously at mount time, before the loader
    /// is ever involved.
    #[error("Invalid configuration: {reason}")]
    Validation {
        /// Description of what was wrong with the configuration.
        reason: String,
    },

    /// An operation was attempted against an instance or mount that cannot
    /// accept it (destroyed instance, replaced handle, unknown mount,
    /// duplicate create while loading).
    #[error("Invalid state: {reason}")]
    InvalidState {
        /// Description of why the operation was refused.
        reason: String,
    },
}

/// Errors from the binary module loader.
///
/// The variants distinguish transport problems from format problems so
/// callers can decide whether a retry makes sense.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The module bytes could not be retrieved from their location.
    #[error("Fetch failed for '{location}': {reason}")]
    FetchFailed {
        /// The location that was requested.
        location: String,
        /// Description of the transport failure.
        reason: String,
    },

    /// The fetched bytes were not a loadable module, or the module could
    /// not be instantiated on this engine.
    #[error("Instantiation failed: {reason}")]
    InstantiationFailed {
        /// Description of the compilation or instantiation failure.
        reason: String,
    },

    /// The loader was invoked without a supported capability report.
    #[error("Host environment unsupported, missing features: {}", .missing.join(", "))]
    Unsupported {
        /// Names of the mandatory features that probed as unavailable.
        missing: Vec<String>,
    },
}

impl BridgeError {
    /// Create a new `Validation` error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidState` error.
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Create an `InvalidState` error for a mount with no live instance.
    pub fn unknown_mount(mount: impl AsRef<str>) -> Self {
        Self::InvalidState {
            reason: format!("no instance mounted at '{}'", mount.as_ref()),
        }
    }

    /// Returns `true` if retrying the operation could plausibly succeed.
    ///
    /// Only load failures qualify; validation, capability, and state errors
    /// report conditions a retry cannot change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Load(LoadError::FetchFailed { .. } | LoadError::InstantiationFailed { .. })
        )
    }

    /// Returns `true` if this error was raised by configuration validation.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

impl LoadError {
    /// Create a new `FetchFailed` error.
    pub fn fetch_failed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FetchFailed {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `InstantiationFailed` error.
    pub fn instantiation_failed(reason: impl Into<String>) -> Self {
        Self::InstantiationFailed {
            reason: reason.into(),
        }
    }
}

impl From<LoadError> for BridgeError {
    fn from(err: LoadError) -> Self {
        match err {
            // A capability failure is its own top-level kind, not a load kind.
            LoadError::Unsupported { missing } => Self::Unsupported { missing },
            other => Self::Load(other),
        }
    }
}
