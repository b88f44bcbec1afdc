//! Host capability probing.
//!
//! Before any module is loaded, the bridge establishes which binary-format
//! extensions the host engine actually accepts. Probing compiles a tiny WAT
//! witness per feature against the real engine; the result is an immutable
//! [`CapabilityReport`] memoized by the [`CapabilityProber`] and replaced
//! only by an explicit re-probe.
//!
//! A witness that fails to compile yields `false` for that flag rather than
//! an error. This per-flag soft-fail is deliberate: the report exists to
//! gate loading, not to diagnose the engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use wasmtime::Module;

use crate::engine::BridgeEngine;

/// A binary-format extension the engine module may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    /// Multi-value results.
    MultiValue,
    /// Bulk memory operations.
    BulkMemory,
    /// Reference types.
    ReferenceTypes,
    /// 128-bit SIMD.
    Simd128,
}

impl Feature {
    /// All probed features, in report order.
    pub const ALL: [Feature; 4] = [
        Feature::MultiValue,
        Feature::BulkMemory,
        Feature::ReferenceTypes,
        Feature::Simd128,
    ];

    /// Whether the verdict requires this feature.
    ///
    /// SIMD is an optimization the engine module can fall back from; the
    /// rest are load-bearing.
    pub fn is_mandatory(self) -> bool {
        !matches!(self, Feature::Simd128)
    }

    /// Stable display name.
    pub fn name(self) -> &'static str {
        match self {
            Feature::MultiValue => "multi-value",
            Feature::BulkMemory => "bulk-memory",
            Feature::ReferenceTypes => "reference-types",
            Feature::Simd128 => "simd128",
        }
    }

    /// Minimal WAT module that only compiles when the feature is accepted.
    fn witness(self) -> &'static str {
        match self {
            Feature::MultiValue => {
                r#"(module (func (export "w") (result i32 i32) (i32.const 1) (i32.const 2)))"#
            }
            Feature::BulkMemory => {
                r#"(module (memory 1) (func (export "w") (memory.fill (i32.const 0) (i32.const 0) (i32.const 0))))"#
            }
            Feature::ReferenceTypes => r#"(module (table (export "w") 1 externref))"#,
            Feature::Simd128 => {
                r#"(module (func (export "w") (result v128) (v128.const i64x2 0 0)))"#
            }
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable result of a capability probe.
///
/// Replaced, never mutated: a re-probe produces a fresh report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityReport {
    flags: BTreeMap<Feature, bool>,
    supported: bool,
}

impl CapabilityReport {
    /// Whether a specific feature probed as available.
    ///
    /// Unknown (never-probed) features read as `false`.
    pub fn has(&self, feature: Feature) -> bool {
        self.flags.get(&feature).copied().unwrap_or(false)
    }

    /// Overall verdict: `true` only if every mandatory feature is available.
    pub fn supported(&self) -> bool {
        self.supported
    }

    /// Names of the mandatory features that probed as unavailable.
    pub fn missing(&self) -> Vec<String> {
        self.flags
            .iter()
            .filter(|(feature, available)| feature.is_mandatory() && !**available)
            .map(|(feature, _)| feature.name().to_string())
            .collect()
    }

    /// Iterate over all probed flags.
    pub fn flags(&self) -> impl Iterator<Item = (Feature, bool)> + '_ {
        self.flags.iter().map(|(f, a)| (*f, *a))
    }
}

/// Probes the host engine and memoizes the resulting report.
///
/// Probing is pure with respect to the engine: repeated calls return the
/// cached report until [`CapabilityProber::reset`] or
/// [`CapabilityProber::reprobe`] invalidates it.
pub struct CapabilityProber {
    engine: BridgeEngine,
    cached: RwLock<Option<Arc<CapabilityReport>>>,
}

impl CapabilityProber {
    /// Create a prober bound to the given engine.
    pub fn new(engine: BridgeEngine) -> Self {
        Self {
            engine,
            cached: RwLock::new(None),
        }
    }

    /// Get the capability report, probing on first use.
    pub fn report(&self) -> Arc<CapabilityReport> {
        if let Some(report) = self.cached.read().as_ref() {
            return Arc::clone(report);
        }

        let report = Arc::new(self.probe());
        *self.cached.write() = Some(Arc::clone(&report));
        report
    }

    /// Drop the cached report; the next [`CapabilityProber::report`] call
    /// probes again.
    pub fn reset(&self) {
        *self.cached.write() = None;
    }

    /// Discard the cached report and probe immediately.
    pub fn reprobe(&self) -> Arc<CapabilityReport> {
        self.reset();
        self.report()
    }

    fn probe(&self) -> CapabilityReport {
        let mut flags = BTreeMap::new();

        for feature in Feature::ALL {
            let available = match Module::new(self.engine.inner(), feature.witness()) {
                Ok(_) => true,
                Err(e) => {
                    // Soft-fail: an undeterminable flag reads as absent.
                    debug!(feature = %feature, error = %e, "Capability witness rejected");
                    false
                }
            };
            flags.insert(feature, available);
        }

        let supported = flags
            .iter()
            .all(|(feature, available)| !feature.is_mandatory() || *available);

        info!(supported, ?flags, "Capability probe complete");

        CapabilityReport { flags, supported }
    }
}

impl std::fmt::Debug for CapabilityProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityProber")
            .field("cached", &self.cached.read().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stage_bridge_common::EngineConfig;

    fn prober(config: &EngineConfig) -> CapabilityProber {
        CapabilityProber::new(BridgeEngine::new(config).unwrap())
    }

    #[test]
    fn test_default_engine_is_supported() {
        let prober = prober(&EngineConfig::default());
        let report = prober.report();

        assert!(report.supported());
        assert!(report.missing().is_empty());
        for feature in Feature::ALL {
            assert!(report.has(feature), "expected {feature} to be available");
        }
    }

    #[test]
    fn test_missing_mandatory_feature_is_unsupported() {
        let config = EngineConfig {
            multi_value: false,
            ..Default::default()
        };
        let report = prober(&config).report();

        assert!(!report.has(Feature::MultiValue));
        assert!(!report.supported());
        assert_eq!(report.missing(), vec!["multi-value".to_string()]);
    }

    #[test]
    fn test_missing_optional_feature_is_still_supported() {
        let config = EngineConfig {
            simd: false,
            ..Default::default()
        };
        let report = prober(&config).report();

        assert!(!report.has(Feature::Simd128));
        assert!(report.supported());
        assert!(report.missing().is_empty());
    }

    #[test]
    fn test_report_is_memoized() {
        let prober = prober(&EngineConfig::default());

        let first = prober.report();
        let second = prober.report();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_reprobe_replaces_report() {
        let prober = prober(&EngineConfig::default());

        let first = prober.report();
        let second = prober.reprobe();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.supported(), second.supported());
    }

    #[test]
    fn test_report_serializes() {
        let report = prober(&EngineConfig::default()).report();
        let json = serde_json::to_string(&*report).unwrap();
        assert!(json.contains("multi-value"));
    }
}
