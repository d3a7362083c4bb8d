//! Radio power state, reported as adapter state changes

use crate::domain::models::{AdapterEvent, AdapterState};
use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};
use windows::core::{IInspectable, Ref};
use windows::Devices::Bluetooth::BluetoothAdapter;
use windows::Devices::Radios::{Radio, RadioState};
use windows::Foundation::TypedEventHandler;

/// Map a radio power state; anything unrecognised is `Unknown`
pub fn adapter_state_from(state: RadioState) -> AdapterState {
    match state {
        RadioState::On => AdapterState::PoweredOn,
        RadioState::Off => AdapterState::PoweredOff,
        RadioState::Disabled => AdapterState::Unauthorized,
        _ => AdapterState::Unknown,
    }
}

/// Keeps the radio object, and with it the state handler, alive
pub struct RadioMonitor {
    _radio: Option<Radio>,
}

impl RadioMonitor {
    /// Reports the current state immediately, then every change.
    ///
    /// A machine without a Bluetooth LE adapter is reported as unsupported
    /// rather than failing startup.
    pub async fn start(event_sender: mpsc::UnboundedSender<AdapterEvent>) -> Result<Self> {
        let radio = match default_radio().await {
            Ok(radio) => radio,
            Err(e) => {
                warn!("No usable Bluetooth adapter: {:#}", e);
                let _ = event_sender.send(AdapterEvent::StateChanged(AdapterState::Unsupported));
                return Ok(Self { _radio: None });
            }
        };

        let sender = event_sender.clone();
        let handler = TypedEventHandler::new(
            move |radio: Ref<Radio>, _: Ref<IInspectable>| {
                if let Some(radio) = radio.as_ref() {
                    let state = adapter_state_from(radio.State()?);
                    let _ = sender.send(AdapterEvent::StateChanged(state));
                }
                Ok(())
            },
        );
        radio.StateChanged(&handler)?;

        let initial = adapter_state_from(radio.State()?);
        info!(name = %radio.Name()?, "Bluetooth radio found");
        let _ = event_sender.send(AdapterEvent::StateChanged(initial));

        Ok(Self {
            _radio: Some(radio),
        })
    }
}

async fn default_radio() -> Result<Radio> {
    let adapter = BluetoothAdapter::GetDefaultAsync()?.await?;
    if !adapter.IsLowEnergySupported()? {
        anyhow::bail!("Adapter does not support Bluetooth LE");
    }
    Ok(adapter.GetRadioAsync()?.await?)
}
