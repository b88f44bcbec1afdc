//! Mount-keyed instance tracking.
//!
//! The registry guarantees single occupancy: at most one live instance per
//! mount identifier. Installing at an occupied mount tears the occupant
//! down (through the caller-supplied hook) before the newcomer becomes
//! visible, inside the map entry's critical section, so the replacement is
//! never observable half-done.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use stage_bridge_core::Instance;

/// Tracks live instances by mount identifier.
#[derive(Default)]
pub struct InstanceRegistry {
    map: DashMap<String, Arc<Instance>>,
}

impl InstanceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `instance` at `mount`.
    ///
    /// If the mount is occupied, `on_replace` runs on the occupant before
    /// the new instance is inserted; the displaced occupant is returned.
    /// The whole read-modify-write happens under the entry lock.
    pub fn install<F>(
        &self,
        mount: &str,
        instance: Arc<Instance>,
        on_replace: F,
    ) -> Option<Arc<Instance>>
    where
        F: FnOnce(&Arc<Instance>),
    {
        match self.map.entry(mount.to_string()) {
            Entry::Occupied(mut entry) => {
                let prior = Arc::clone(entry.get());
                on_replace(&prior);
                entry.insert(instance);
                Some(prior)
            }
            Entry::Vacant(entry) => {
                entry.insert(instance);
                None
            }
        }
    }

    /// Get the instance at `mount`, if any.
    pub fn lookup(&self, mount: &str) -> Option<Arc<Instance>> {
        self.map.get(mount).map(|entry| Arc::clone(&entry))
    }

    /// Remove the entry at `mount` only if it is still owned by the
    /// instance with the given id.
    ///
    /// Returns `true` if an entry was removed. The ownership check keeps a
    /// stale handle from evicting the instance that replaced it.
    pub fn remove_if(&self, mount: &str, id: Uuid) -> bool {
        self.map
            .remove_if(mount, |_, instance| instance.id() == id)
            .is_some()
    }

    /// Number of registered mounts.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no mounts are registered.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// All registered mount identifiers.
    pub fn mounts(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("mounts", &self.map.len())
            .finish()
    }
}
