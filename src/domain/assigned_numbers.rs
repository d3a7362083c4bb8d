//! Bluetooth SIG assigned numbers
//!
//! Resolves well-known 16-bit attribute UUIDs to a readable name and the
//! `org.bluetooth.*` type identifier, and converts between the short and
//! full 128-bit UUID forms.

use thiserror::Error;
use uuid::Uuid;

/// `00000000-0000-1000-8000-00805f9b34fb`
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5f9b_34fb);

const BASE_MASK: u128 = (1u128 << 96) - 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UuidParseError {
    #[error("UUID is empty")]
    Empty,
    #[error("Invalid UUID length {len} in {input:?} (expected 4, 8 or 32 hex digits)")]
    InvalidLength { input: String, len: usize },
    #[error("Invalid hex digits in UUID {0:?}")]
    InvalidHex(String),
}

/// Parse a UUID in 16-bit (`2a00`), 32-bit or 128-bit form.
///
/// Hyphens and a leading `0x` are ignored, so `b3b3690150d34044808d50835b13a6cd`
/// and `b3b36901-50d3-4044-808d-50835b13a6cd` are the same UUID.
pub fn parse_uuid(input: &str) -> Result<Uuid, UuidParseError> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let hex = trimmed.replace('-', "");

    if hex.is_empty() {
        return Err(UuidParseError::Empty);
    }

    match hex.len() {
        4 | 8 => u32::from_str_radix(&hex, 16)
            .map(from_short)
            .map_err(|_| UuidParseError::InvalidHex(input.to_string())),
        32 => u128::from_str_radix(&hex, 16)
            .map(Uuid::from_u128)
            .map_err(|_| UuidParseError::InvalidHex(input.to_string())),
        len => Err(UuidParseError::InvalidLength {
            input: input.to_string(),
            len,
        }),
    }
}

/// Expand a 16 or 32-bit assigned number onto the Bluetooth base UUID
pub const fn from_short(short: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID.as_u128() | ((short as u128) << 96))
}

/// The short form of `uuid` if it lies on the Bluetooth base UUID
pub fn short_form(uuid: &Uuid) -> Option<u32> {
    let value = uuid.as_u128();
    if value & BASE_MASK == BLUETOOTH_BASE_UUID.as_u128() {
        Some((value >> 96) as u32)
    } else {
        None
    }
}

/// Compact rendering: `2a00` for assigned numbers, 32 hex digits otherwise
pub fn display_uuid(uuid: &Uuid) -> String {
    match short_form(uuid) {
        Some(short) if short <= 0xFFFF => format!("{:04x}", short),
        Some(short) => format!("{:08x}", short),
        None => uuid.simple().to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignedName {
    pub name: &'static str,
    pub kind: &'static str,
}

const SERVICES: &[(u16, &str, &str)] = &[
    (0x1800, "Generic Access", "org.bluetooth.service.generic_access"),
    (0x1801, "Generic Attribute", "org.bluetooth.service.generic_attribute"),
    (0x1802, "Immediate Alert", "org.bluetooth.service.immediate_alert"),
    (0x1803, "Link Loss", "org.bluetooth.service.link_loss"),
    (0x1804, "Tx Power", "org.bluetooth.service.tx_power"),
    (0x1805, "Current Time Service", "org.bluetooth.service.current_time"),
    (0x1809, "Health Thermometer", "org.bluetooth.service.health_thermometer"),
    (0x180a, "Device Information", "org.bluetooth.service.device_information"),
    (0x180d, "Heart Rate", "org.bluetooth.service.heart_rate"),
    (0x180f, "Battery Service", "org.bluetooth.service.battery_service"),
    (0x1812, "Human Interface Device", "org.bluetooth.service.human_interface_device"),
    (0x1814, "Running Speed and Cadence", "org.bluetooth.service.running_speed_and_cadence"),
    (0x1816, "Cycling Speed and Cadence", "org.bluetooth.service.cycling_speed_and_cadence"),
    (0x181a, "Environmental Sensing", "org.bluetooth.service.environmental_sensing"),
];

const CHARACTERISTICS: &[(u16, &str, &str)] = &[
    (0x2a00, "Device Name", "org.bluetooth.characteristic.gap.device_name"),
    (0x2a01, "Appearance", "org.bluetooth.characteristic.gap.appearance"),
    (0x2a02, "Peripheral Privacy Flag", "org.bluetooth.characteristic.gap.peripheral_privacy_flag"),
    (0x2a03, "Reconnection Address", "org.bluetooth.characteristic.gap.reconnection_address"),
    (
        0x2a04,
        "Peripheral Preferred Connection Parameters",
        "org.bluetooth.characteristic.gap.peripheral_preferred_connection_parameters",
    ),
    (0x2a05, "Service Changed", "org.bluetooth.characteristic.gatt.service_changed"),
    (0x2a06, "Alert Level", "org.bluetooth.characteristic.alert_level"),
    (0x2a07, "Tx Power Level", "org.bluetooth.characteristic.tx_power_level"),
    (0x2a19, "Battery Level", "org.bluetooth.characteristic.battery_level"),
    (0x2a1c, "Temperature Measurement", "org.bluetooth.characteristic.temperature_measurement"),
    (0x2a23, "System ID", "org.bluetooth.characteristic.system_id"),
    (0x2a24, "Model Number String", "org.bluetooth.characteristic.model_number_string"),
    (0x2a25, "Serial Number String", "org.bluetooth.characteristic.serial_number_string"),
    (0x2a26, "Firmware Revision String", "org.bluetooth.characteristic.firmware_revision_string"),
    (0x2a27, "Hardware Revision String", "org.bluetooth.characteristic.hardware_revision_string"),
    (0x2a28, "Software Revision String", "org.bluetooth.characteristic.software_revision_string"),
    (0x2a29, "Manufacturer Name String", "org.bluetooth.characteristic.manufacturer_name_string"),
    (0x2a2b, "Current Time", "org.bluetooth.characteristic.current_time"),
    (0x2a37, "Heart Rate Measurement", "org.bluetooth.characteristic.heart_rate_measurement"),
    (0x2a38, "Body Sensor Location", "org.bluetooth.characteristic.body_sensor_location"),
    (0x2a4a, "HID Information", "org.bluetooth.characteristic.hid_information"),
    (0x2a4b, "Report Map", "org.bluetooth.characteristic.report_map"),
    (0x2a4d, "Report", "org.bluetooth.characteristic.report"),
    (0x2a50, "PnP ID", "org.bluetooth.characteristic.pnp_id"),
    (0x2a6e, "Temperature", "org.bluetooth.characteristic.temperature"),
    (0x2a6f, "Humidity", "org.bluetooth.characteristic.humidity"),
    (
        0x2aa6,
        "Central Address Resolution",
        "org.bluetooth.characteristic.gap.central_address_resolution",
    ),
];

const DESCRIPTORS: &[(u16, &str, &str)] = &[
    (
        0x2900,
        "Characteristic Extended Properties",
        "org.bluetooth.descriptor.gatt.characteristic_extended_properties",
    ),
    (
        0x2901,
        "Characteristic User Description",
        "org.bluetooth.descriptor.gatt.characteristic_user_description",
    ),
    (
        0x2902,
        "Client Characteristic Configuration",
        "org.bluetooth.descriptor.gatt.client_characteristic_configuration",
    ),
    (
        0x2903,
        "Server Characteristic Configuration",
        "org.bluetooth.descriptor.gatt.server_characteristic_configuration",
    ),
    (
        0x2904,
        "Characteristic Presentation Format",
        "org.bluetooth.descriptor.gatt.characteristic_presentation_format",
    ),
    (
        0x2905,
        "Characteristic Aggregate Format",
        "org.bluetooth.descriptor.gatt.characteristic_aggregate_format",
    ),
    (0x2906, "Valid Range", "org.bluetooth.descriptor.valid_range"),
    (0x2908, "Report Reference", "org.bluetooth.descriptor.report_reference"),
];

fn lookup(table: &[(u16, &'static str, &'static str)], uuid: &Uuid) -> Option<AssignedName> {
    let short = u16::try_from(short_form(uuid)?).ok()?;
    table
        .iter()
        .find(|(number, _, _)| *number == short)
        .map(|&(_, name, kind)| AssignedName { name, kind })
}

pub fn service(uuid: &Uuid) -> Option<AssignedName> {
    lookup(SERVICES, uuid)
}

pub fn characteristic(uuid: &Uuid) -> Option<AssignedName> {
    lookup(CHARACTERISTICS, uuid)
}

pub fn descriptor(uuid: &Uuid) -> Option<AssignedName> {
    lookup(DESCRIPTORS, uuid)
}
