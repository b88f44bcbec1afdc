//! Integration tests for the embedding facade.
//!
//! These tests exercise the public surface end to end:
//! - Mounting with validation and capability gating
//! - Single occupancy and replace-on-mount
//! - Handle semantics after replacement
//! - Event delivery ordering

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use stage_bridge_api::Bridge;
use stage_bridge_common::{BridgeConfig, BridgeError, EngineConfig, InstanceConfig, LoadError};
use stage_bridge_core::{LifecycleEvent, LifecycleState, ModuleFetcher, ModuleSource};

// ============================================================================
// Fixtures
// ============================================================================

// Minimal module exporting a no-op "_start" function.
const ENGINE_WASM: &[u8] = &[
    0x00, 0x61, 0x73, 0x6d, // magic: \0asm
    0x01, 0x00, 0x00, 0x00, // version: 1
    0x01, 0x04, 0x01, 0x60, 0x00, 0x00, // type section: () -> ()
    0x03, 0x02, 0x01, 0x00, // function section: one func, type 0
    0x07, 0x0a, 0x01, 0x06, 0x5f, 0x73, 0x74, 0x61, 0x72, 0x74, 0x00,
    0x00, // export section: "_start"
    0x0a, 0x04, 0x01, 0x02, 0x00, 0x0b, // code section: empty body
];

struct StaticFetcher;

#[async_trait]
impl ModuleFetcher for StaticFetcher {
    async fn fetch(&self, _source: &ModuleSource) -> Result<Vec<u8>, LoadError> {
        Ok(ENGINE_WASM.to_vec())
    }
}

/// Counts calls; the first fetch stalls so a test can race it.
struct SequencedFetcher {
    calls: Arc<AtomicUsize>,
    first_call_delay: Duration,
}

#[async_trait]
impl ModuleFetcher for SequencedFetcher {
    async fn fetch(&self, _source: &ModuleSource) -> Result<Vec<u8>, LoadError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(self.first_call_delay).await;
        }
        Ok(ENGINE_WASM.to_vec())
    }
}

fn bridge() -> Bridge {
    Bridge::with_fetcher(&BridgeConfig::default(), Arc::new(StaticFetcher)).unwrap()
}

fn state_of(event: &LifecycleEvent) -> Option<LifecycleState> {
    match event {
        LifecycleEvent::StateChanged { state, .. } => Some(*state),
        LifecycleEvent::LoadFailed { .. } => None,
    }
}

// ============================================================================
// Test: Happy Path
// ============================================================================

#[tokio::test]
async fn test_mount_happy_path() {
    let bridge = bridge();
    let mut events = bridge.subscribe();

    let handle = bridge
        .mount("stage-a", InstanceConfig::new("./engine.wasm"))
        .await
        .unwrap();

    assert_eq!(handle.mount(), "stage-a");
    assert_eq!(handle.state(), LifecycleState::Running);
    assert_eq!(
        bridge.state_at("stage-a").unwrap(),
        LifecycleState::Running
    );
    assert_eq!(bridge.mounts(), vec!["stage-a".to_string()]);

    // Uninitialized → Loading → Running, with exactly one Running event.
    assert_eq!(
        state_of(&events.try_recv().unwrap()),
        Some(LifecycleState::Loading)
    );
    assert_eq!(
        state_of(&events.try_recv().unwrap()),
        Some(LifecycleState::Running)
    );
    assert!(events.try_recv().is_err(), "expected exactly two events");
}

#[tokio::test]
async fn test_pause_resume_through_facade() {
    let bridge = bridge();
    let handle = bridge
        .mount("stage-a", InstanceConfig::new("./engine.wasm"))
        .await
        .unwrap();

    assert_eq!(bridge.pause(&handle).unwrap(), LifecycleState::Suspended);
    assert_eq!(
        bridge.state_at("stage-a").unwrap(),
        LifecycleState::Suspended
    );

    assert_eq!(bridge.resume(&handle).unwrap(), LifecycleState::Running);

    // Pausing twice is a no-op, not an error.
    bridge.pause(&handle).unwrap();
    assert_eq!(bridge.pause(&handle).unwrap(), LifecycleState::Suspended);
}

// ============================================================================
// Test: Validation
// ============================================================================

#[tokio::test]
async fn test_unknown_config_key_rejected_synchronously() {
    let bridge = bridge();

    // Unknown options never make it past parsing.
    let err = InstanceConfig::from_json(r#"{"source": "./engine.wasm", "quality": "high"}"#)
        .unwrap_err();
    assert!(err.is_validation());

    // And a config invalid for semantic reasons is rejected at mount time
    // with the registry untouched.
    let err = bridge
        .mount("stage-a", InstanceConfig::new("   "))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(bridge.mounts().is_empty(), "registry must stay unchanged");
}

// ============================================================================
// Test: Capability Gate
// ============================================================================

#[tokio::test]
async fn test_unsupported_host_fails_before_fetching() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = BridgeConfig {
        engine: EngineConfig {
            multi_value: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let bridge = Bridge::with_fetcher(
        &config,
        Arc::new(SequencedFetcher {
            calls: Arc::clone(&calls),
            first_call_delay: Duration::ZERO,
        }),
    )
    .unwrap();

    let err = bridge
        .mount("stage-a", InstanceConfig::new("./engine.wasm"))
        .await
        .unwrap_err();

    match err {
        BridgeError::Unsupported { missing } => {
            assert_eq!(missing, vec!["multi-value".to_string()]);
        }
        other => panic!("expected Unsupported, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0, "loader must not run");
    assert!(bridge.mounts().is_empty());
}

// ============================================================================
// Test: Single Occupancy / Replacement
// ============================================================================

#[tokio::test]
async fn test_remount_replaces_prior_instance() {
    let bridge = bridge();

    let first = bridge
        .mount("stage-a", InstanceConfig::new("./v1.wasm"))
        .await
        .unwrap();
    let second = bridge
        .mount("stage-a", InstanceConfig::new("./v2.wasm"))
        .await
        .unwrap();

    assert_ne!(first.id(), second.id());
    assert_eq!(first.state(), LifecycleState::Destroyed);
    assert_eq!(second.state(), LifecycleState::Running);

    // Single occupancy: one live instance at the mount.
    assert_eq!(bridge.mounts().len(), 1);

    // The stale handle reaches only its own destroyed instance.
    let err = bridge.pause(&first).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidState { .. }));
    assert_eq!(second.state(), LifecycleState::Running);

    // Unmounting through the stale handle must not evict the replacement.
    bridge.unmount(&first).unwrap();
    assert_eq!(
        bridge.state_at("stage-a").unwrap(),
        LifecycleState::Running
    );
}

#[tokio::test]
async fn test_remount_while_loading_cancels_occupant() {
    let calls = Arc::new(AtomicUsize::new(0));
    let bridge = Arc::new(
        Bridge::with_fetcher(
            &BridgeConfig::default(),
            Arc::new(SequencedFetcher {
                calls,
                first_call_delay: Duration::from_secs(5),
            }),
        )
        .unwrap(),
    );
    let mut events = bridge.subscribe();

    let first = tokio::spawn({
        let bridge = Arc::clone(&bridge);
        async move {
            bridge
                .mount("stage-a", InstanceConfig::new("./v1.wasm"))
                .await
        }
    });

    // Wait until the first mount is loading.
    let event = events.recv().await.unwrap();
    assert_eq!(state_of(&event), Some(LifecycleState::Loading));
    let first_id = event.instance();

    // Remounting destroys the loading occupant before installing.
    let second = bridge
        .mount("stage-a", InstanceConfig::new("./v2.wasm"))
        .await
        .unwrap();
    assert_eq!(second.state(), LifecycleState::Running);

    // The cancelled mount resolves with its instance destroyed, and the
    // late load completion produces no further notifications for it.
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.id(), first_id);
    assert_eq!(first.state(), LifecycleState::Destroyed);

    let remaining: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    let first_running = remaining.iter().any(|e| {
        e.instance() == first_id && state_of(e) == Some(LifecycleState::Running)
    });
    assert!(!first_running, "replaced instance must never reach Running");

    let second_running = remaining
        .iter()
        .filter(|e| state_of(e) == Some(LifecycleState::Running))
        .count();
    assert_eq!(second_running, 1, "exactly one Running notification");

    assert_eq!(bridge.state_at("stage-a").unwrap(), LifecycleState::Running);
    assert_eq!(bridge.mounts().len(), 1);
}

// ============================================================================
// Test: Unmount
// ============================================================================

#[tokio::test]
async fn test_unmount_destroys_and_releases_mount() {
    let bridge = bridge();
    let handle = bridge
        .mount("stage-a", InstanceConfig::new("./engine.wasm"))
        .await
        .unwrap();

    bridge.unmount(&handle).unwrap();

    assert_eq!(handle.state(), LifecycleState::Destroyed);
    assert!(bridge.mounts().is_empty());
    assert!(matches!(
        bridge.state_at("stage-a").unwrap_err(),
        BridgeError::InvalidState { .. }
    ));

    // Idempotent: a second unmount is a no-op.
    bridge.unmount(&handle).unwrap();

    // But state-mutating operations on the destroyed instance are rejected.
    assert!(bridge.pause(&handle).is_err());
    assert!(bridge.resume(&handle).is_err());
    assert_eq!(handle.state(), LifecycleState::Destroyed);
}

#[tokio::test]
async fn test_mount_reuses_released_mount() {
    let bridge = bridge();

    let first = bridge
        .mount("stage-a", InstanceConfig::new("./engine.wasm"))
        .await
        .unwrap();
    bridge.unmount(&first).unwrap();

    let second = bridge
        .mount("stage-a", InstanceConfig::new("./engine.wasm"))
        .await
        .unwrap();
    assert_eq!(second.state(), LifecycleState::Running);
    assert_ne!(first.id(), second.id());
}

// ============================================================================
// Test: Event Ordering
// ============================================================================

#[tokio::test]
async fn test_event_order_over_full_lifecycle() {
    let bridge = bridge();
    let mut events = bridge.subscribe();

    let handle = bridge
        .mount("stage-a", InstanceConfig::new("./engine.wasm"))
        .await
        .unwrap();
    bridge.pause(&handle).unwrap();
    bridge.resume(&handle).unwrap();
    bridge.unmount(&handle).unwrap();

    let observed: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|e| state_of(&e))
        .collect();
    assert_eq!(
        observed,
        vec![
            LifecycleState::Loading,
            LifecycleState::Running,
            LifecycleState::Suspended,
            LifecycleState::Running,
            LifecycleState::Destroyed,
        ]
    );
}
