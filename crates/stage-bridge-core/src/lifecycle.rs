//! Instance lifecycle management.
//!
//! One [`Instance`] represents one embedded engine attached to a mount.
//! The [`LifecycleController`] owns every transition its state machine
//! makes:
//!
//! ```text
//! Uninitialized --create--> Loading --success--> Running <--> Suspended
//!                              │                    │            │
//!                              └──failure/destroy──▶ Destroyed ◀─┘
//! ```
//!
//! `Destroyed` is terminal: no transition ever leaves it. Transitions for
//! one instance serialize on its state lock, and events are emitted inside
//! the transition critical section so observers see them in order, at most
//! once each.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stage_bridge_common::{AutoplayPolicy, BridgeError, InstanceConfig, LoadError};

use crate::events::{LifecycleEvent, Observers};
use crate::loader::{LoadedModule, ModuleLoader};
use crate::probe::CapabilityReport;

/// Lifecycle states of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Created but not yet asked to load.
    Uninitialized,
    /// Load in progress.
    Loading,
    /// Loaded and live.
    Running,
    /// Loaded but paused.
    Suspended,
    /// Torn down. Terminal.
    Destroyed,
}

impl LifecycleState {
    /// Whether this state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed)
    }

    /// Whether the instance holds a live module in this state.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Running | Self::Suspended)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// One embedded engine attached to a mount.
///
/// Owned by the [`LifecycleController`]; the registry and handles hold
/// `Arc` references. The configuration snapshot is immutable for the
/// instance's whole lifetime.
pub struct Instance {
    id: Uuid,
    mount: String,
    config: InstanceConfig,
    state: Mutex<LifecycleState>,
    module: Mutex<Option<LoadedModule>>,
    cancel: CancellationToken,
}

impl Instance {
    /// Create a new instance in `Uninitialized`.
    pub fn new(mount: impl Into<String>, config: InstanceConfig) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            mount: mount.into(),
            config,
            state: Mutex::new(LifecycleState::Uninitialized),
            module: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    /// Unique instance identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The mount this instance is attached to.
    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// The configuration snapshot supplied at creation.
    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("mount", &self.mount)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Drives instance state transitions.
///
/// Cheap to clone; clones share the loader and observer set.
#[derive(Clone)]
pub struct LifecycleController {
    loader: ModuleLoader,
    observers: Observers,
}

impl LifecycleController {
    /// Create a controller using the given loader and observer set.
    pub fn new(loader: ModuleLoader, observers: Observers) -> Self {
        Self { loader, observers }
    }

    /// The observer set transitions are reported to.
    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    /// Drive `Uninitialized → Loading → Running` (or `Suspended` under an
    /// `autoplay = off` policy).
    ///
    /// The loading phase is the only asynchronous stretch of the state
    /// machine. It races the instance's cancellation token: a `destroy`
    /// issued mid-load wins, the load result is discarded, and the
    /// instance stays `Destroyed`; it is never resurrected. In that case
    /// `create` returns `Ok` and the caller observes the terminal state on
    /// the instance.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::InvalidState`] if the instance is not
    ///   `Uninitialized` (a second `create` during `Loading` is rejected,
    ///   not queued)
    /// - [`BridgeError::Unsupported`] / [`BridgeError::Load`] if loading
    ///   fails; the instance transitions to `Destroyed` and the failure is
    ///   also reported once on the event channel
    pub async fn create(
        &self,
        instance: &Arc<Instance>,
        report: &CapabilityReport,
    ) -> Result<(), BridgeError> {
        {
            let mut state = instance.state.lock();
            match *state {
                LifecycleState::Uninitialized => {
                    *state = LifecycleState::Loading;
                    self.emit_state(instance, LifecycleState::Loading);
                }
                other => {
                    return Err(BridgeError::invalid_state(format!(
                        "create on a {other} instance"
                    )));
                }
            }
        }

        debug!(instance = %instance.id, mount = %instance.mount, "Loading module");

        let loaded = tokio::select! {
            () = instance.cancel.cancelled() => {
                // destroy() already drove the terminal transition; the
                // in-flight load future is dropped here.
                debug!(instance = %instance.id, "Load cancelled");
                return Ok(());
            }
            result = self.loader.load(&instance.config.source, instance.id, report) => result,
        };

        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                return if self.fail_load(instance, &err) {
                    Err(err.into())
                } else {
                    Ok(())
                };
            }
        };

        // A destroy may have landed between load completion and here.
        if instance.state().is_terminal() {
            debug!(instance = %instance.id, "Load completed after destroy, discarding");
            return Ok(());
        }

        if let Err(err) = loaded.start(&instance.config.entry_point).await {
            return if self.fail_load(instance, &err) {
                Err(err.into())
            } else {
                Ok(())
            };
        }

        {
            let mut state = instance.state.lock();
            if state.is_terminal() {
                // Destroyed while the entry export was running; discard.
                debug!(instance = %instance.id, "Start completed after destroy, discarding");
                return Ok(());
            }

            *instance.module.lock() = Some(loaded);
            *state = LifecycleState::Running;
            self.emit_state(instance, LifecycleState::Running);

            if instance.config.autoplay == AutoplayPolicy::Off {
                *state = LifecycleState::Suspended;
                self.emit_state(instance, LifecycleState::Suspended);
            }
        }

        info!(
            instance = %instance.id,
            mount = %instance.mount,
            state = %instance.state(),
            "Instance created"
        );
        Ok(())
    }

    /// `Running → Suspended`.
    ///
    /// A no-op returning the current state when the instance is not
    /// `Running`, except `Destroyed`, which rejects every operation.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidState`] for a destroyed instance.
    pub fn suspend(&self, instance: &Arc<Instance>) -> Result<LifecycleState, BridgeError> {
        let mut state = instance.state.lock();
        match *state {
            LifecycleState::Running => {
                *state = LifecycleState::Suspended;
                self.emit_state(instance, LifecycleState::Suspended);
                Ok(LifecycleState::Suspended)
            }
            LifecycleState::Destroyed => Err(BridgeError::invalid_state(
                "suspend on a destroyed instance",
            )),
            other => Ok(other),
        }
    }

    /// `Suspended → Running`.
    ///
    /// Same no-op and rejection rules as [`LifecycleController::suspend`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidState`] for a destroyed instance.
    pub fn resume(&self, instance: &Arc<Instance>) -> Result<LifecycleState, BridgeError> {
        let mut state = instance.state.lock();
        match *state {
            LifecycleState::Suspended => {
                *state = LifecycleState::Running;
                self.emit_state(instance, LifecycleState::Running);
                Ok(LifecycleState::Running)
            }
            LifecycleState::Destroyed => Err(BridgeError::invalid_state(
                "resume on a destroyed instance",
            )),
            other => Ok(other),
        }
    }

    /// Tear the instance down. Terminal and idempotent: the first call
    /// cancels any pending load, releases the module handle, and emits one
    /// `Destroyed` event; repeat calls are silent no-ops.
    pub fn destroy(&self, instance: &Arc<Instance>) -> LifecycleState {
        let mut state = instance.state.lock();
        if state.is_terminal() {
            return LifecycleState::Destroyed;
        }

        let prior = *state;
        *state = LifecycleState::Destroyed;
        instance.cancel.cancel();
        *instance.module.lock() = None;
        self.emit_state(instance, LifecycleState::Destroyed);

        debug!(instance = %instance.id, mount = %instance.mount, %prior, "Instance destroyed");
        LifecycleState::Destroyed
    }

    /// Drive a load failure to `Destroyed`, reporting it once on the event
    /// channel. Returns `true` when the failure was recorded and should be
    /// propagated to the `create` caller, `false` when the instance was
    /// already destroyed and the late failure is discarded.
    fn fail_load(&self, instance: &Arc<Instance>, err: &LoadError) -> bool {
        let mut state = instance.state.lock();
        if state.is_terminal() {
            debug!(instance = %instance.id, "Load failed after destroy, discarding");
            return false;
        }

        *state = LifecycleState::Destroyed;
        instance.cancel.cancel();
        self.observers.emit(&LifecycleEvent::LoadFailed {
            mount: instance.mount.clone(),
            instance: instance.id,
            reason: err.to_string(),
        });
        self.emit_state(instance, LifecycleState::Destroyed);

        warn!(instance = %instance.id, mount = %instance.mount, error = %err, "Load failed");
        true
    }

    fn emit_state(&self, instance: &Arc<Instance>, state: LifecycleState) {
        self.observers.emit(&LifecycleEvent::StateChanged {
            mount: instance.mount.clone(),
            instance: instance.id,
            state,
        });
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController").finish_non_exhaustive()
    }
}
