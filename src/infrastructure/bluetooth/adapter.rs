use crate::domain::adapter::{
    AdapterError, BleAdapter, CharacteristicHandle, DescriptorHandle, ServiceHandle, ValueStream,
};
use crate::domain::models::{AdapterEvent, PeripheralIdentity};
use crate::infrastructure::bluetooth::connection::GattRegistry;
use crate::infrastructure::bluetooth::radio::RadioMonitor;
use crate::infrastructure::bluetooth::scanner::BleScanner;
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

/// [`BleAdapter`] over the WinRT Bluetooth LE stack
pub struct WinRtAdapter {
    scanner: BleScanner,
    gatt: GattRegistry,
    _radio: RadioMonitor,
}

impl WinRtAdapter {
    /// Starts radio monitoring right away; the first `StateChanged` event is
    /// queued before this returns.
    pub async fn new(event_sender: mpsc::UnboundedSender<AdapterEvent>) -> anyhow::Result<Self> {
        let radio = RadioMonitor::start(event_sender.clone()).await?;
        Ok(Self {
            scanner: BleScanner::new(event_sender.clone()),
            gatt: GattRegistry::new(event_sender),
            _radio: radio,
        })
    }
}

fn address_of(peripheral: &PeripheralIdentity) -> Result<u64, AdapterError> {
    peripheral
        .raw_address()
        .ok_or_else(|| AdapterError::UnknownPeripheral(peripheral.to_string()))
}

fn platform(e: anyhow::Error) -> AdapterError {
    AdapterError::Platform(format!("{:#}", e))
}

fn gatt(e: anyhow::Error) -> AdapterError {
    AdapterError::Gatt(format!("{:#}", e))
}

#[async_trait]
impl BleAdapter for WinRtAdapter {
    async fn start_scan(
        &self,
        service_filters: &[Uuid],
        allow_duplicates: bool,
    ) -> Result<(), AdapterError> {
        self.scanner
            .start(service_filters, allow_duplicates)
            .map_err(|e| AdapterError::Unavailable(format!("{:#}", e)))
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        self.scanner.stop().map_err(platform)
    }

    async fn connect(&self, peripheral: &PeripheralIdentity) -> Result<(), AdapterError> {
        let address = address_of(peripheral)?;
        self.gatt.connect(peripheral, address).await.map_err(platform)
    }

    async fn discover_services(
        &self,
        peripheral: &PeripheralIdentity,
    ) -> Result<Vec<ServiceHandle>, AdapterError> {
        let address = address_of(peripheral)?;
        self.gatt.services(peripheral, address).await.map_err(gatt)
    }

    async fn discover_included_services(
        &self,
        service: &ServiceHandle,
    ) -> Result<Vec<Uuid>, AdapterError> {
        let address = address_of(&service.peripheral)?;
        self.gatt
            .included_services(address, service.handle)
            .await
            .map_err(gatt)
    }

    async fn discover_characteristics(
        &self,
        service: &ServiceHandle,
    ) -> Result<Vec<CharacteristicHandle>, AdapterError> {
        let address = address_of(&service.peripheral)?;
        self.gatt.characteristics(service, address).await.map_err(gatt)
    }

    async fn discover_descriptors(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<Vec<DescriptorHandle>, AdapterError> {
        let address = address_of(&characteristic.peripheral)?;
        self.gatt
            .descriptors(address, characteristic.handle)
            .await
            .map_err(gatt)
    }

    async fn enable_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), AdapterError> {
        let address = address_of(&characteristic.peripheral)?;
        self.gatt
            .enable_notifications(address, characteristic)
            .await
            .map_err(gatt)
    }

    fn value_changes(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<ValueStream, AdapterError> {
        let address = address_of(&characteristic.peripheral)?;
        self.gatt
            .value_changes(address, characteristic.handle)
            .map_err(gatt)
    }
}
