//! Scripted in-memory adapter for exercising the discovery pipeline

use crate::domain::adapter::{
    AdapterError, BleAdapter, CharacteristicHandle, DescriptorHandle, ServiceHandle, ValueStream,
};
use crate::domain::models::{
    AdapterEvent, AddressType, Advertisement, CharacteristicProperties, PeripheralIdentity,
    ValueChange,
};
use crate::discovery::side_channel::SideEvent;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartScan {
        filters: Vec<Uuid>,
        allow_duplicates: bool,
    },
    StopScan,
    Connect(String),
    DiscoverServices,
    DiscoverIncluded(u16),
    DiscoverCharacteristics(u16),
    DiscoverDescriptors(u16),
    EnableNotifications(u16),
    ValueChanges(u16),
}

#[derive(Default)]
struct Script {
    services: Vec<(u16, Uuid)>,
    included: HashMap<u16, Vec<Uuid>>,
    characteristics: HashMap<u16, Vec<(u16, Uuid, CharacteristicProperties)>>,
    descriptors: HashMap<u16, Vec<(u16, Uuid)>>,
    stalled_services: HashSet<u16>,
    failing_descriptors: HashSet<u16>,
    descriptor_yields: HashMap<u16, usize>,
    fail_scan: bool,
    fail_connect: bool,
    fail_notify: bool,
    fail_value_changes: bool,
    manual_connect: bool,
}

pub struct FakeAdapterBuilder {
    script: Script,
}

impl FakeAdapterBuilder {
    pub fn service(mut self, handle: u16, uuid: Uuid) -> Self {
        self.script.services.push((handle, uuid));
        self
    }

    pub fn included(mut self, service: u16, uuid: Uuid) -> Self {
        self.script.included.entry(service).or_default().push(uuid);
        self
    }

    pub fn characteristic(
        mut self,
        service: u16,
        handle: u16,
        uuid: Uuid,
        properties: CharacteristicProperties,
    ) -> Self {
        self.script
            .characteristics
            .entry(service)
            .or_default()
            .push((handle, uuid, properties));
        self
    }

    pub fn descriptor(mut self, characteristic: u16, handle: u16, uuid: Uuid) -> Self {
        self.script
            .descriptors
            .entry(characteristic)
            .or_default()
            .push((handle, uuid));
        self
    }

    /// Characteristic discovery for `service` never completes
    pub fn stall_characteristics(mut self, service: u16) -> Self {
        self.script.stalled_services.insert(service);
        self
    }

    pub fn fail_descriptors(mut self, characteristic: u16) -> Self {
        self.script.failing_descriptors.insert(characteristic);
        self
    }

    /// Yield to the scheduler `yields` times before answering, to reorder completions
    pub fn descriptor_delay(mut self, characteristic: u16, yields: usize) -> Self {
        self.script.descriptor_yields.insert(characteristic, yields);
        self
    }

    pub fn fail_scan(mut self) -> Self {
        self.script.fail_scan = true;
        self
    }

    pub fn fail_connect(mut self) -> Self {
        self.script.fail_connect = true;
        self
    }

    pub fn fail_notify(mut self) -> Self {
        self.script.fail_notify = true;
        self
    }

    pub fn fail_value_changes(mut self) -> Self {
        self.script.fail_value_changes = true;
        self
    }

    /// Do not report `Connected` on connect; the test pushes link events itself
    pub fn manual_connect(mut self) -> Self {
        self.script.manual_connect = true;
        self
    }

    pub fn build(
        self,
    ) -> (
        Arc<FakeAdapter>,
        mpsc::UnboundedSender<AdapterEvent>,
        mpsc::UnboundedReceiver<AdapterEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = Arc::new(FakeAdapter {
            script: self.script,
            events: tx.clone(),
            calls: Mutex::new(Vec::new()),
            descriptors_completed: AtomicUsize::new(0),
            value_senders: Mutex::new(HashMap::new()),
        });
        (adapter, tx, rx)
    }
}

pub struct FakeAdapter {
    script: Script,
    events: mpsc::UnboundedSender<AdapterEvent>,
    calls: Mutex<Vec<Call>>,
    descriptors_completed: AtomicUsize,
    value_senders: Mutex<HashMap<u16, mpsc::UnboundedSender<ValueChange>>>,
}

impl FakeAdapter {
    pub fn builder() -> FakeAdapterBuilder {
        FakeAdapterBuilder {
            script: Script::default(),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn descriptors_completed(&self) -> usize {
        self.descriptors_completed.load(Ordering::SeqCst)
    }

    /// Push a value change into a registered handler
    pub fn push_value(&self, characteristic: u16, payload: &[u8]) -> bool {
        let senders = self.value_senders.lock().unwrap();
        match senders.get(&characteristic) {
            Some(tx) => tx
                .send(ValueChange {
                    payload: payload.to_vec(),
                    is_notification: true,
                })
                .is_ok(),
            None => false,
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BleAdapter for FakeAdapter {
    async fn start_scan(
        &self,
        service_filters: &[Uuid],
        allow_duplicates: bool,
    ) -> Result<(), AdapterError> {
        self.record(Call::StartScan {
            filters: service_filters.to_vec(),
            allow_duplicates,
        });
        if self.script.fail_scan {
            return Err(AdapterError::Unavailable("radio busy".to_string()));
        }
        let _ = self.events.send(AdapterEvent::ScanStarted);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        self.record(Call::StopScan);
        let _ = self.events.send(AdapterEvent::ScanStopped);
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralIdentity) -> Result<(), AdapterError> {
        self.record(Call::Connect(peripheral.address.clone()));
        if self.script.fail_connect {
            return Err(AdapterError::UnknownPeripheral(peripheral.to_string()));
        }
        if !self.script.manual_connect {
            let _ = self.events.send(AdapterEvent::Connected(peripheral.clone()));
        }
        Ok(())
    }

    async fn discover_services(
        &self,
        peripheral: &PeripheralIdentity,
    ) -> Result<Vec<ServiceHandle>, AdapterError> {
        self.record(Call::DiscoverServices);
        Ok(self
            .script
            .services
            .iter()
            .map(|(handle, uuid)| ServiceHandle {
                peripheral: peripheral.clone(),
                handle: *handle,
                uuid: *uuid,
            })
            .collect())
    }

    async fn discover_included_services(
        &self,
        service: &ServiceHandle,
    ) -> Result<Vec<Uuid>, AdapterError> {
        self.record(Call::DiscoverIncluded(service.handle));
        Ok(self
            .script
            .included
            .get(&service.handle)
            .cloned()
            .unwrap_or_default())
    }

    async fn discover_characteristics(
        &self,
        service: &ServiceHandle,
    ) -> Result<Vec<CharacteristicHandle>, AdapterError> {
        self.record(Call::DiscoverCharacteristics(service.handle));
        if self.script.stalled_services.contains(&service.handle) {
            return std::future::pending().await;
        }
        Ok(self
            .script
            .characteristics
            .get(&service.handle)
            .map(|chars| {
                chars
                    .iter()
                    .map(|(handle, uuid, properties)| CharacteristicHandle {
                        peripheral: service.peripheral.clone(),
                        service_handle: service.handle,
                        handle: *handle,
                        uuid: *uuid,
                        properties: *properties,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn discover_descriptors(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<Vec<DescriptorHandle>, AdapterError> {
        self.record(Call::DiscoverDescriptors(characteristic.handle));
        let yields = self
            .script
            .descriptor_yields
            .get(&characteristic.handle)
            .copied()
            .unwrap_or(0);
        for _ in 0..yields {
            tokio::task::yield_now().await;
        }
        self.descriptors_completed.fetch_add(1, Ordering::SeqCst);

        if self.script.failing_descriptors.contains(&characteristic.handle) {
            return Err(AdapterError::Gatt("unreachable".to_string()));
        }
        Ok(self
            .script
            .descriptors
            .get(&characteristic.handle)
            .map(|descs| {
                descs
                    .iter()
                    .map(|(handle, uuid)| DescriptorHandle {
                        handle: *handle,
                        uuid: *uuid,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn enable_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), AdapterError> {
        self.record(Call::EnableNotifications(characteristic.handle));
        if self.script.fail_notify {
            return Err(AdapterError::Gatt("insufficient authentication".to_string()));
        }
        Ok(())
    }

    fn value_changes(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<ValueStream, AdapterError> {
        self.record(Call::ValueChanges(characteristic.handle));
        if self.script.fail_value_changes {
            return Err(AdapterError::UnknownAttribute(characteristic.handle));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.value_senders
            .lock()
            .unwrap()
            .insert(characteristic.handle, tx);
        Ok(rx)
    }
}

pub fn pochiru() -> (PeripheralIdentity, Advertisement) {
    (
        PeripheralIdentity::new("AA:BB:CC:DD:EE:FF", AddressType::Public),
        Advertisement {
            local_name: Some("PochiruDevice".to_string()),
            manufacturer_data: Some(vec![0x59, 0x00, 0x01, 0x10, 0x20]),
        },
    )
}

/// Wait for the first side event accepted by `pred`, skipping the rest
pub async fn next_side_event(
    rx: &mut mpsc::UnboundedReceiver<SideEvent>,
    mut pred: impl FnMut(&SideEvent) -> bool,
) -> Option<SideEvent> {
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = rx.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}
