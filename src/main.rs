// Only the Windows build wires the discovery engine to a radio
#![cfg_attr(not(windows), allow(dead_code))]

mod discovery;
mod domain;
mod infrastructure;
mod presentation;

use domain::settings::{SettingsService, SettingsSource};
use infrastructure::logging;
use tracing::{info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _log_guard = logging::init_logger(&settings.log_settings)?;

    info!("Starting GATT explorer");
    match settings_service.source() {
        SettingsSource::File(path) => info!("Settings loaded from {}", path.display()),
        SettingsSource::Defaults => info!("No settings file, using defaults"),
        SettingsSource::Invalid { path, reason } => {
            warn!("Ignoring settings at {}: {}", path.display(), reason)
        }
    }

    let config = settings.discovery.compile()?;
    run(config).await
}

#[cfg(windows)]
async fn run(config: domain::settings::DiscoveryConfig) -> anyhow::Result<()> {
    use discovery::engine::DiscoveryEngine;
    use discovery::side_channel::log_side_events;
    use infrastructure::bluetooth::WinRtAdapter;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let adapter = Arc::new(WinRtAdapter::new(event_tx).await?);
    let (engine, outputs) = DiscoveryEngine::new(adapter, config);

    tokio::spawn(log_side_events(outputs.side_events));

    let mut reports = outputs.reports;
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            print!("{}", report.render());
        }
    });

    tokio::select! {
        _ = engine.run(event_rx) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted, shutting down");
        }
    }
    Ok(())
}

#[cfg(not(windows))]
async fn run(_config: domain::settings::DiscoveryConfig) -> anyhow::Result<()> {
    tracing::error!("No Bluetooth LE backend is available on this platform");
    Ok(())
}
