//! Conversions between WinRT GATT types and the domain model

use crate::domain::models::{AddressType, CharacteristicProperties};
use anyhow::Result;
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::BluetoothAddressType;
use windows::Devices::Bluetooth::GenericAttributeProfile::GattCharacteristicProperties;
use windows::Storage::Streams::{DataReader, IBuffer};

pub fn guid_from_uuid(uuid: &Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

pub fn uuid_from_guid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

/// WinRT extends the declaration byte with reliable/writable-aux bits above 0xFF
pub fn properties_from(raw: GattCharacteristicProperties) -> CharacteristicProperties {
    CharacteristicProperties::from_bits((raw.0 & 0xFF) as u8)
}

pub fn address_type_from(raw: BluetoothAddressType) -> AddressType {
    if raw == BluetoothAddressType::Random {
        AddressType::Random
    } else {
        AddressType::Public
    }
}

/// The device must be opened with the type it advertised under
pub fn address_type_to(address_type: AddressType) -> BluetoothAddressType {
    match address_type {
        AddressType::Public => BluetoothAddressType::Public,
        AddressType::Random => BluetoothAddressType::Random,
    }
}

pub fn read_buffer(buffer: &IBuffer) -> Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

/// Rebuild the raw manufacturer AD payload: company id little endian, then vendor data
pub fn manufacturer_bytes(company_id: u16, data: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(data.len() + 2);
    raw.extend_from_slice(&company_id.to_le_bytes());
    raw.extend_from_slice(data);
    raw
}
