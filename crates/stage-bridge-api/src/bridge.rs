//! The embedding facade.
//!
//! [`Bridge`] is the stable surface host code consumes. It validates
//! configuration before anything else runs, gates loading on the memoized
//! capability report, routes operations through the mount-keyed registry,
//! and relays lifecycle notifications to registered observers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use stage_bridge_common::{BridgeConfig, BridgeError, InstanceConfig};
use stage_bridge_core::{
    BridgeEngine, CapabilityProber, CapabilityReport, ChannelObserver, Instance,
    LifecycleController, LifecycleEvent, LifecycleObserver, LifecycleState, ModuleFetcher,
    ModuleLoader, Observers,
};

use crate::registry::InstanceRegistry;

/// A caller's reference to one mounted instance.
///
/// Handles are bound to the specific instance they were minted for: after a
/// remount replaces that instance, operations through the old handle reach
/// only the destroyed original, never its replacement.
#[derive(Clone)]
pub struct InstanceHandle {
    instance: Arc<Instance>,
}

impl InstanceHandle {
    fn new(instance: Arc<Instance>) -> Self {
        Self { instance }
    }

    /// Unique identifier of the underlying instance.
    pub fn id(&self) -> Uuid {
        self.instance.id()
    }

    /// The mount this handle's instance was attached to.
    pub fn mount(&self) -> &str {
        self.instance.mount()
    }

    /// Current lifecycle state of this handle's instance.
    pub fn state(&self) -> LifecycleState {
        self.instance.state()
    }

    fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }
}

impl std::fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("id", &self.id())
            .field("mount", &self.mount())
            .field("state", &self.state())
            .finish()
    }
}

/// The embedding facade.
///
/// # Example
///
/// ```ignore
/// use stage_bridge_api::Bridge;
/// use stage_bridge_common::{BridgeConfig, InstanceConfig};
///
/// let bridge = Bridge::new(&BridgeConfig::default())?;
/// let handle = bridge.mount("stage-a", InstanceConfig::new("./engine.wasm")).await?;
/// bridge.pause(&handle)?;
/// bridge.resume(&handle)?;
/// bridge.unmount(&handle)?;
/// ```
pub struct Bridge {
    engine: BridgeEngine,
    prober: CapabilityProber,
    controller: LifecycleController,
    registry: InstanceRegistry,
    observers: Observers,
}

impl Bridge {
    /// Create a bridge with the default http/filesystem module fetcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine configuration is invalid.
    pub fn new(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let engine = BridgeEngine::new(&config.engine)?;
        let loader = ModuleLoader::new(engine.clone(), config.loader.clone());
        Ok(Self::assemble(engine, loader))
    }

    /// Create a bridge with a custom module fetcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine configuration is invalid.
    pub fn with_fetcher(
        config: &BridgeConfig,
        fetcher: Arc<dyn ModuleFetcher>,
    ) -> Result<Self, BridgeError> {
        let engine = BridgeEngine::new(&config.engine)?;
        let loader = ModuleLoader::with_fetcher(engine.clone(), fetcher);
        Ok(Self::assemble(engine, loader))
    }

    fn assemble(engine: BridgeEngine, loader: ModuleLoader) -> Self {
        let observers = Observers::new();
        let prober = CapabilityProber::new(engine.clone());
        let controller = LifecycleController::new(loader, observers.clone());

        Self {
            engine,
            prober,
            controller,
            registry: InstanceRegistry::new(),
            observers,
        }
    }

    /// The engine shared by every instance.
    pub fn engine(&self) -> &BridgeEngine {
        &self.engine
    }

    /// The memoized capability report, probing on first use.
    pub fn capabilities(&self) -> Arc<CapabilityReport> {
        self.prober.report()
    }

    /// Discard the cached capability report and probe again.
    pub fn reprobe(&self) -> Arc<CapabilityReport> {
        self.prober.reprobe()
    }

    /// Register a lifecycle observer.
    pub fn add_observer(&self, observer: Arc<dyn LifecycleObserver>) {
        self.observers.add(observer);
    }

    /// Subscribe to lifecycle events over a channel.
    ///
    /// Events arrive at most once per transition, in transition order per
    /// instance.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LifecycleEvent> {
        let (observer, receiver) = ChannelObserver::channel();
        self.observers.add(Arc::new(observer));
        receiver
    }

    /// Mount an engine instance.
    ///
    /// Validates the configuration, checks host capability support, evicts
    /// any occupant of the mount (destroying it first), loads the module,
    /// and resolves once the instance is live. If a concurrent remount or
    /// unmount destroys the instance mid-load, the returned handle reports
    /// `Destroyed` and no further notifications are produced for it.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Validation`] for a bad mount id or configuration,
    ///   before anything else runs
    /// - [`BridgeError::Unsupported`] when mandatory host features are
    ///   missing, before any load attempt
    /// - [`BridgeError::Load`] when fetching or instantiation fails; the
    ///   registry entry is removed and the failure has also been reported
    ///   on the event channel
    /// - [`BridgeError::InvalidState`] when a concurrent remount superseded
    ///   this mount before loading began
    pub async fn mount(
        &self,
        mount: &str,
        config: InstanceConfig,
    ) -> Result<InstanceHandle, BridgeError> {
        if mount.trim().is_empty() {
            return Err(BridgeError::validation("'mount' must not be empty"));
        }
        config.validate()?;

        let report = self.prober.report();
        if !report.supported() {
            return Err(BridgeError::Unsupported {
                missing: report.missing(),
            });
        }

        let instance = Instance::new(mount, config);
        debug!(mount, instance = %instance.id(), "Mounting");

        let replaced = self.registry.install(mount, Arc::clone(&instance), |prior| {
            self.controller.destroy(prior);
        });
        if let Some(prior) = replaced {
            info!(mount, prior = %prior.id(), "Replaced existing instance");
        }

        match self.controller.create(&instance, &report).await {
            Ok(()) => Ok(InstanceHandle::new(instance)),
            Err(err) => {
                // Only evict our own corpse; a concurrent remount may
                // already own the mount.
                self.registry.remove_if(mount, instance.id());
                Err(err)
            }
        }
    }

    /// Pause a running instance.
    ///
    /// A no-op returning the current state unless the instance is running;
    /// destroyed instances reject the operation.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidState`] if the instance is destroyed.
    pub fn pause(&self, handle: &InstanceHandle) -> Result<LifecycleState, BridgeError> {
        self.controller.suspend(handle.instance())
    }

    /// Resume a suspended instance.
    ///
    /// Same no-op and rejection rules as [`Bridge::pause`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidState`] if the instance is destroyed.
    pub fn resume(&self, handle: &InstanceHandle) -> Result<LifecycleState, BridgeError> {
        self.controller.resume(handle.instance())
    }

    /// Unmount an instance: destroy it and release its mount.
    ///
    /// Idempotent: unmounting an already-destroyed handle is a no-op, and
    /// the registry entry is only removed while this handle's instance
    /// still owns it.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` keeps the surface stable.
    pub fn unmount(&self, handle: &InstanceHandle) -> Result<(), BridgeError> {
        self.controller.destroy(handle.instance());
        self.registry.remove_if(handle.mount(), handle.id());
        Ok(())
    }

    /// Current state of the instance at `mount`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidState`] for an unknown mount.
    pub fn state_at(&self, mount: &str) -> Result<LifecycleState, BridgeError> {
        self.registry
            .lookup(mount)
            .map(|instance| instance.state())
            .ok_or_else(|| BridgeError::unknown_mount(mount))
    }

    /// All currently registered mount identifiers.
    pub fn mounts(&self) -> Vec<String> {
        self.registry.mounts()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("mounts", &self.registry.len())
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}
