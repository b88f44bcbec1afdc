//! stage-bridge host harness entry point.
//!
//! A small embedder: loads a TOML config, builds the bridge, mounts the
//! configured engine instances, and streams lifecycle events until Ctrl-C.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stage_bridge_api::Bridge;
use stage_bridge_common::InstanceConfig;
use stage_bridge_common::config_file::ConfigFile;

#[derive(Parser)]
#[command(name = "stage-bridge", about = "Host harness for embedded engine instances")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long, env = "STAGE_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Mount a single module directly (URL or path), without a config file.
    #[arg(long)]
    source: Option<String>,

    /// Mount identifier used with --source.
    #[arg(long, default_value = "stage-main")]
    mount: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stage_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config_file = match &args.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConfigFile::default(),
    };

    let bridge = Bridge::new(&config_file.bridge)?;

    let report = bridge.capabilities();
    if !report.supported() {
        anyhow::bail!(
            "host environment unsupported, missing features: {}",
            report.missing().join(", ")
        );
    }
    for (feature, available) in report.flags() {
        info!(feature = %feature, available, "Capability");
    }

    let mut events = bridge.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(?event, "Lifecycle event");
        }
    });

    let mut handles = Vec::new();
    for entry in &config_file.mounts {
        let handle = bridge
            .mount(&entry.mount, entry.instance_config())
            .await
            .with_context(|| format!("Failed to mount '{}'", entry.mount))?;
        handles.push(handle);
    }
    if let Some(source) = &args.source {
        let handle = bridge
            .mount(&args.mount, InstanceConfig::new(source))
            .await
            .with_context(|| format!("Failed to mount '{}'", args.mount))?;
        handles.push(handle);
    }

    if handles.is_empty() {
        warn!("Nothing to mount; pass --config or --source");
        return Ok(());
    }

    info!(mounts = handles.len(), "All instances mounted; Ctrl-C to exit");
    tokio::signal::ctrl_c().await?;

    for handle in &handles {
        bridge.unmount(handle)?;
    }
    info!("Shutdown complete");

    Ok(())
}
