//! Device connections and GATT object lookup
//!
//! WinRT hands out objects, the discovery engine speaks in attribute
//! handles. Every object discovered here is kept by `(address, handle)` so
//! later requests can find it again.

use crate::domain::adapter::{CharacteristicHandle, DescriptorHandle, ServiceHandle};
use crate::domain::models::{
    AdapterEvent, CharacteristicProperties, PeripheralIdentity, ValueChange,
};
use crate::infrastructure::bluetooth::protocol;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::{IInspectable, Ref};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattDeviceService, GattSession, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;

type AttributeKey = (u64, u16);

#[derive(Default)]
struct Objects {
    devices: HashMap<u64, BluetoothLEDevice>,
    sessions: HashMap<u64, GattSession>,
    services: HashMap<AttributeKey, GattDeviceService>,
    characteristics: HashMap<AttributeKey, GattCharacteristic>,
}

/// Open devices and the GATT objects discovered on them
pub struct GattRegistry {
    objects: Mutex<Objects>,
    event_sender: mpsc::UnboundedSender<AdapterEvent>,
}

impl GattRegistry {
    /// Create an empty registry reporting link changes into `event_sender`
    pub fn new(event_sender: mpsc::UnboundedSender<AdapterEvent>) -> Self {
        Self {
            objects: Mutex::new(Objects::default()),
            event_sender,
        }
    }

    fn objects(&self) -> std::sync::MutexGuard<'_, Objects> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn device(&self, address: u64) -> Result<BluetoothLEDevice> {
        self.objects()
            .devices
            .get(&address)
            .cloned()
            .ok_or_else(|| anyhow!("Device {:#X} is not connected", address))
    }

    fn service(&self, key: AttributeKey) -> Result<GattDeviceService> {
        self.objects()
            .services
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown service handle {:#06x}", key.1))
    }

    fn characteristic(&self, key: AttributeKey) -> Result<GattCharacteristic> {
        self.objects()
            .characteristics
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown characteristic handle {:#06x}", key.1))
    }

    /// Opens the device and asks the OS to hold the link.
    ///
    /// Link state is reported through `Connected`/`Disconnected` events, not
    /// through the return value.
    pub async fn connect(&self, identity: &PeripheralIdentity, address: u64) -> Result<()> {
        info!("Connecting to Bluetooth device: {:#X}", address);
        let device = BluetoothLEDevice::FromBluetoothAddressWithBluetoothAddressTypeAsync(
            address,
            protocol::address_type_to(identity.address_type),
        )?
        .await?;

        let sender = self.event_sender.clone();
        let peripheral = identity.clone();
        let status_handler = TypedEventHandler::new(
            move |dev: Ref<BluetoothLEDevice>, _: Ref<IInspectable>| {
                if let Some(dev) = dev.as_ref() {
                    let event = match dev.ConnectionStatus()? {
                        BluetoothConnectionStatus::Connected => {
                            AdapterEvent::Connected(peripheral.clone())
                        }
                        _ => AdapterEvent::Disconnected(peripheral.clone()),
                    };
                    let _ = sender.send(event);
                }
                Ok(())
            },
        );
        device.ConnectionStatusChanged(&status_handler)?;

        let session = GattSession::FromDeviceIdAsync(&device.BluetoothDeviceId()?)?.await?;
        session.SetMaintainConnection(true)?;

        if device.ConnectionStatus()? == BluetoothConnectionStatus::Connected {
            let _ = self.event_sender.send(AdapterEvent::Connected(identity.clone()));
        }

        let mut objects = self.objects();
        objects.devices.insert(address, device);
        objects.sessions.insert(address, session);
        Ok(())
    }

    /// Primary services, uncached
    pub async fn services(
        &self,
        identity: &PeripheralIdentity,
        address: u64,
    ) -> Result<Vec<ServiceHandle>> {
        let device = self.device(address)?;
        let result = device
            .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        check_status(result.Status()?, "service discovery")?;

        let list = result.Services()?;
        let mut handles = Vec::with_capacity(list.Size()? as usize);
        let mut found = Vec::new();
        for i in 0..list.Size()? {
            let service = list.GetAt(i)?;
            let handle = service.AttributeHandle()?;
            handles.push(ServiceHandle {
                peripheral: identity.clone(),
                handle,
                uuid: protocol::uuid_from_guid(service.Uuid()?),
            });
            found.push(((address, handle), service));
        }
        keep_first(&mut self.objects().services, found);

        debug!("Found {} services on {:#X}", handles.len(), address);
        Ok(handles)
    }

    /// UUIDs of the services included by `service`
    pub async fn included_services(&self, address: u64, service: u16) -> Result<Vec<Uuid>> {
        let service = self.service((address, service))?;
        let result = service
            .GetIncludedServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        check_status(result.Status()?, "included service discovery")?;

        let list = result.Services()?;
        let mut uuids = Vec::with_capacity(list.Size()? as usize);
        for i in 0..list.Size()? {
            uuids.push(protocol::uuid_from_guid(list.GetAt(i)?.Uuid()?));
        }
        Ok(uuids)
    }

    /// Characteristics of a known service, uncached
    pub async fn characteristics(
        &self,
        service: &ServiceHandle,
        address: u64,
    ) -> Result<Vec<CharacteristicHandle>> {
        let gatt_service = self.service((address, service.handle))?;
        let result = gatt_service
            .GetCharacteristicsWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        check_status(result.Status()?, "characteristic discovery")?;

        let list = result.Characteristics()?;
        let mut handles = Vec::with_capacity(list.Size()? as usize);
        let mut found = Vec::new();
        for i in 0..list.Size()? {
            let characteristic = list.GetAt(i)?;
            let handle = characteristic.AttributeHandle()?;
            handles.push(CharacteristicHandle {
                peripheral: service.peripheral.clone(),
                service_handle: service.handle,
                handle,
                uuid: protocol::uuid_from_guid(characteristic.Uuid()?),
                properties: protocol::properties_from(
                    characteristic.CharacteristicProperties()?,
                ),
            });
            found.push(((address, handle), characteristic));
        }
        keep_first(&mut self.objects().characteristics, found);
        Ok(handles)
    }

    /// Descriptors of a known characteristic, uncached
    pub async fn descriptors(&self, address: u64, characteristic: u16) -> Result<Vec<DescriptorHandle>> {
        let characteristic = self.characteristic((address, characteristic))?;
        let result = characteristic
            .GetDescriptorsWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        check_status(result.Status()?, "descriptor discovery")?;

        let list = result.Descriptors()?;
        let mut handles = Vec::with_capacity(list.Size()? as usize);
        for i in 0..list.Size()? {
            let descriptor = list.GetAt(i)?;
            handles.push(DescriptorHandle {
                handle: descriptor.AttributeHandle()?,
                uuid: protocol::uuid_from_guid(descriptor.Uuid()?),
            });
        }
        Ok(handles)
    }

    /// Writes the CCCD; indicate is used only when notify is not offered
    pub async fn enable_notifications(
        &self,
        address: u64,
        characteristic: &CharacteristicHandle,
    ) -> Result<()> {
        let gatt = self.characteristic((address, characteristic.handle))?;
        let value = if characteristic
            .properties
            .contains(CharacteristicProperties::NOTIFY)
        {
            GattClientCharacteristicConfigurationDescriptorValue::Notify
        } else {
            GattClientCharacteristicConfigurationDescriptorValue::Indicate
        };

        let status = gatt
            .WriteClientCharacteristicConfigurationDescriptorAsync(value)?
            .await?;
        check_status(status, "CCCD write")
    }

    /// Forward every `ValueChanged` of the characteristic into a channel
    pub fn value_changes(
        &self,
        address: u64,
        characteristic: u16,
    ) -> Result<mpsc::UnboundedReceiver<ValueChange>> {
        let gatt = self.characteristic((address, characteristic))?;
        let (tx, rx) = mpsc::unbounded_channel();

        let handler = TypedEventHandler::new(
            move |_: Ref<GattCharacteristic>, args: Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    match protocol::read_buffer(&args.CharacteristicValue()?) {
                        Ok(payload) => {
                            let _ = tx.send(ValueChange {
                                payload,
                                is_notification: true,
                            });
                        }
                        Err(e) => warn!("Unreadable value change: {}", e),
                    }
                }
                Ok(())
            },
        );
        gatt.ValueChanged(&handler)?;
        Ok(rx)
    }
}

/// Rediscovery hands out fresh WinRT objects for the same handles. The first
/// object stays registered since `ValueChanged` handlers hang off it.
fn keep_first<V>(objects: &mut HashMap<AttributeKey, V>, found: Vec<(AttributeKey, V)>) {
    for (key, object) in found {
        objects.entry(key).or_insert(object);
    }
}

fn check_status(status: GattCommunicationStatus, operation: &str) -> Result<()> {
    if status != GattCommunicationStatus::Success {
        anyhow::bail!("{} returned {:?}", operation, status);
    }
    Ok(())
}
