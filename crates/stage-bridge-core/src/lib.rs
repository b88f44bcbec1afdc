//! Core bridge machinery for stage-bridge.
//!
//! This crate provides the moving parts behind the embedding API:
//! - [`BridgeEngine`]: configured Wasmtime engine shared by all instances
//! - [`CapabilityProber`]: host feature detection with a memoized report
//! - [`ModuleLoader`]: fetches and instantiates the compiled engine module
//! - [`LifecycleController`]: drives the per-instance state machine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     BridgeEngine                        │
//! │  (Shared across all instances, thread-safe)             │
//! └─────────────────────────────────────────────────────────┘
//!        │                                      │
//!        ▼                                      ▼
//! ┌──────────────────────┐      ┌─────────────────────────────┐
//! │   CapabilityProber   │─gate─▶       ModuleLoader          │
//! │  (memoized report)   │      │  (fetch → compile →         │
//! └──────────────────────┘      │   instantiate, one attempt) │
//!                               └─────────────────────────────┘
//!                                              │
//!                                              ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            LifecycleController + Instance               │
//! │  Uninitialized → Loading → Running ⇄ Suspended          │
//! │                        └──────────▶ Destroyed (terminal)│
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod events;
pub mod lifecycle;
pub mod loader;
pub mod probe;

pub use engine::BridgeEngine;
pub use events::{ChannelObserver, LifecycleEvent, LifecycleObserver, NoopObserver, Observers};
pub use lifecycle::{Instance, LifecycleController, LifecycleState};
pub use loader::{LoadedModule, ModuleFetcher, ModuleLoader, ModuleSource};
pub use probe::{CapabilityProber, CapabilityReport, Feature};
