//! Advertisement watcher
//!
//! The WinRT watcher reports advertising packets and scan responses
//! separately and has no duplicate filter of its own. Reports are merged per
//! address in [`ScanRecords`], which also applies the service filter and
//! suppresses unchanged repeats unless `allow_duplicates` is set.

use crate::domain::models::{AdapterEvent, PeripheralIdentity};
use crate::domain::scan_records::{AdvertisementFragment, ScanRecords};
use crate::infrastructure::bluetooth::protocol;
use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;
use windows::core::Ref;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisement, BluetoothLEAdvertisementReceivedEventArgs,
    BluetoothLEAdvertisementWatcher, BluetoothLEAdvertisementWatcherStoppedEventArgs,
    BluetoothLEScanningMode,
};
use windows::Foundation::TypedEventHandler;

/// BLE scanner over a WinRT advertisement watcher
pub struct BleScanner {
    watcher: Mutex<Option<BluetoothLEAdvertisementWatcher>>,
    event_sender: mpsc::UnboundedSender<AdapterEvent>,
}

impl BleScanner {
    /// Create an idle scanner reporting into `event_sender`
    pub fn new(event_sender: mpsc::UnboundedSender<AdapterEvent>) -> Self {
        Self {
            watcher: Mutex::new(None),
            event_sender,
        }
    }

    /// Start a fresh watcher; records from any earlier scan are dropped.
    /// An empty filter list reports every advertiser.
    pub fn start(&self, service_filters: &[Uuid], allow_duplicates: bool) -> Result<()> {
        self.stop()?;

        info!(
            filters = service_filters.len(),
            allow_duplicates, "Starting BLE scan"
        );

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let records = Arc::new(Mutex::new(ScanRecords::new(
            service_filters.to_vec(),
            allow_duplicates,
        )));
        let sender = self.event_sender.clone();

        let received = TypedEventHandler::new(
            move |_: Ref<BluetoothLEAdvertisementWatcher>,
                  args: Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                let Some(args) = args.as_ref() else {
                    return Ok(());
                };
                let address = args.BluetoothAddress()?;
                let address_type = protocol::address_type_from(args.BluetoothAddressType()?);
                let identity = PeripheralIdentity::from_raw(address, address_type);

                // An unreadable report leaves the record untouched
                let fragment = match read_fragment(&args.Advertisement()?) {
                    Ok(fragment) => fragment,
                    Err(e) => {
                        debug!(peripheral = %identity, "Unreadable advertisement: {}", e);
                        return Ok(());
                    }
                };

                let merged = records
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .observe(address, fragment);
                if let Some(advertisement) = merged {
                    let _ = sender.send(AdapterEvent::Discovered {
                        identity,
                        advertisement,
                    });
                }
                Ok(())
            },
        );

        let sender = self.event_sender.clone();
        let stopped = TypedEventHandler::new(
            move |_: Ref<BluetoothLEAdvertisementWatcher>,
                  _: Ref<BluetoothLEAdvertisementWatcherStoppedEventArgs>| {
                let _ = sender.send(AdapterEvent::ScanStopped);
                Ok(())
            },
        );

        watcher.Received(&received)?;
        watcher.Stopped(&stopped)?;
        watcher.Start()?;
        *self.watcher.lock().unwrap_or_else(|e| e.into_inner()) = Some(watcher);

        let _ = self.event_sender.send(AdapterEvent::ScanStarted);
        Ok(())
    }

    /// The watcher's `Stopped` callback reports the stop
    pub fn stop(&self) -> Result<()> {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(watcher) = watcher {
            info!("Stopping BLE scan");
            watcher.Stop()?;
        }
        Ok(())
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn read_fragment(adv: &BluetoothLEAdvertisement) -> Result<AdvertisementFragment> {
    let name = adv.LocalName()?.to_string();

    let uuids = adv.ServiceUuids()?;
    let mut service_uuids = Vec::with_capacity(uuids.Size()? as usize);
    for i in 0..uuids.Size()? {
        service_uuids.push(protocol::uuid_from_guid(uuids.GetAt(i)?));
    }

    let sections = adv.ManufacturerData()?;
    let manufacturer_data = if sections.Size()? > 0 {
        let first = sections.GetAt(0)?;
        let data = protocol::read_buffer(&first.Data()?)?;
        Some(protocol::manufacturer_bytes(first.CompanyId()?, &data))
    } else {
        None
    };

    Ok(AdvertisementFragment {
        local_name: (!name.is_empty()).then_some(name),
        service_uuids,
        manufacturer_data,
    })
}
