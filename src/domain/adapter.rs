//! BLE adapter port
//!
//! The explorer never talks to a radio directly. Everything it needs from the
//! platform stack goes through [`BleAdapter`]; unsolicited notifications
//! (power state, advertisements, link up/down) arrive separately as
//! [`AdapterEvent`](crate::domain::models::AdapterEvent)s on the channel the
//! backend was constructed with.

use crate::domain::models::{CharacteristicProperties, PeripheralIdentity, ValueChange};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("Bluetooth adapter unavailable: {0}")]
    Unavailable(String),
    #[error("Unknown peripheral: {0}")]
    UnknownPeripheral(String),
    #[error("Unknown attribute handle {0:#06x}")]
    UnknownAttribute(u16),
    #[error("GATT request failed: {0}")]
    Gatt(String),
    #[error("Platform error: {0}")]
    Platform(String),
}

/// A primary service as enumerated on a connected peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub peripheral: PeripheralIdentity,
    /// Attribute handle of the service declaration
    pub handle: u16,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub peripheral: PeripheralIdentity,
    pub service_handle: u16,
    pub handle: u16,
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorHandle {
    pub handle: u16,
    pub uuid: Uuid,
}

/// Standing stream of value changes for one characteristic
pub type ValueStream = mpsc::UnboundedReceiver<ValueChange>;

#[async_trait]
pub trait BleAdapter: Send + Sync + 'static {
    async fn start_scan(
        &self,
        service_filters: &[Uuid],
        allow_duplicates: bool,
    ) -> Result<(), AdapterError>;

    async fn stop_scan(&self) -> Result<(), AdapterError>;

    /// Ask for a link. Success is reported later through
    /// `AdapterEvent::Connected`, not by this call returning.
    async fn connect(&self, peripheral: &PeripheralIdentity) -> Result<(), AdapterError>;

    /// Full, unfiltered service list in adapter order
    async fn discover_services(
        &self,
        peripheral: &PeripheralIdentity,
    ) -> Result<Vec<ServiceHandle>, AdapterError>;

    async fn discover_included_services(
        &self,
        service: &ServiceHandle,
    ) -> Result<Vec<Uuid>, AdapterError>;

    async fn discover_characteristics(
        &self,
        service: &ServiceHandle,
    ) -> Result<Vec<CharacteristicHandle>, AdapterError>;

    async fn discover_descriptors(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<Vec<DescriptorHandle>, AdapterError>;

    /// Write the client characteristic configuration for notify or indicate
    async fn enable_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), AdapterError>;

    /// Register a handler for value changes. The stream stays open for as
    /// long as the adapter keeps the characteristic alive.
    fn value_changes(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<ValueStream, AdapterError>;
}
