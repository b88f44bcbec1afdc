//! Lifecycle events and observers.
//!
//! Every state transition an instance makes is reported to registered
//! observers, at most once per transition and in transition order. The
//! [`LifecycleObserver`] trait is the extension point; [`ChannelObserver`]
//! bridges events onto a tokio channel for async consumers.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::lifecycle::LifecycleState;

/// Events emitted as instances move through their lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// The instance entered a new state.
    StateChanged {
        /// Mount identifier the instance is attached to.
        mount: String,
        /// Instance identifier.
        instance: Uuid,
        /// The state that was entered.
        state: LifecycleState,
    },

    /// Loading failed; the instance is destroyed.
    ///
    /// Emitted once, alongside the terminal `StateChanged` transition.
    LoadFailed {
        /// Mount identifier the instance was attached to.
        mount: String,
        /// Instance identifier.
        instance: Uuid,
        /// Description of the failure.
        reason: String,
    },
}

impl LifecycleEvent {
    /// The mount this event concerns.
    pub fn mount(&self) -> &str {
        match self {
            Self::StateChanged { mount, .. } | Self::LoadFailed { mount, .. } => mount,
        }
    }

    /// The instance this event concerns.
    pub fn instance(&self) -> Uuid {
        match self {
            Self::StateChanged { instance, .. } | Self::LoadFailed { instance, .. } => *instance,
        }
    }
}

/// Trait for receiving lifecycle events.
///
/// Observers are invoked inline, inside the transition critical section,
/// which is what guarantees in-order, at-most-once delivery. Implementations
/// must return quickly and must not call back into the bridge.
pub trait LifecycleObserver: Send + Sync {
    /// Called for each lifecycle event.
    fn on_event(&self, event: &LifecycleEvent);
}

/// A no-op observer that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopObserver;

impl LifecycleObserver for NoopObserver {
    fn on_event(&self, _event: &LifecycleEvent) {
        // Intentionally empty
    }
}

/// An observer that forwards events to an unbounded channel.
///
/// Unbounded keeps emission non-blocking under the transition lock; event
/// volume is a handful per instance lifetime, so growth is not a concern.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelObserver {
    /// Create an observer forwarding to the given sender.
    pub fn new(sender: mpsc::UnboundedSender<LifecycleEvent>) -> Self {
        Self { sender }
    }

    /// Create an observer together with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl LifecycleObserver for ChannelObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        // Ignore send errors - receiver may have been dropped
        let _ = self.sender.send(event.clone());
    }
}

/// A shared, growable set of observers.
#[derive(Clone, Default)]
pub struct Observers {
    inner: Arc<RwLock<Vec<Arc<dyn LifecycleObserver>>>>,
}

impl Observers {
    /// Create an empty observer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer.
    pub fn add(&self, observer: Arc<dyn LifecycleObserver>) {
        self.inner.write().push(observer);
    }

    /// Deliver an event to every registered observer, in registration order.
    pub fn emit(&self, event: &LifecycleEvent) {
        for observer in self.inner.read().iter() {
            observer.on_event(event);
        }
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.len())
            .finish()
    }
}
