//! Public embedding surface for stage-bridge.
//!
//! This crate provides what host code actually consumes:
//! - [`Bridge`]: the facade (mount, pause, resume, unmount, subscribe)
//! - [`InstanceHandle`]: a caller's reference to one mounted instance
//! - [`InstanceRegistry`]: mount-keyed tracking with single-occupancy
//!
//! The facade validates inputs, gates loading on capability support, and
//! shields callers from the lifecycle machinery in `stage-bridge-core`.

pub mod bridge;
pub mod registry;

pub use bridge::{Bridge, InstanceHandle};
pub use registry::InstanceRegistry;
