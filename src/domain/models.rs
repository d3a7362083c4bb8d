use crate::domain::assigned_numbers::{self, AssignedName};
use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::BitOr;
use uuid::Uuid;

/// How a peripheral's Bluetooth address was assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Public,
    Random,
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => f.write_str("public"),
            Self::Random => f.write_str("random"),
        }
    }
}

/// Identity of an advertising peripheral, used as the deduplication key.
///
/// Addresses are stored lower-case and colon separated (`aa:bb:cc:dd:ee:ff`)
/// so that identities reported by different backends compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralIdentity {
    pub address: String,
    pub address_type: AddressType,
}

impl PeripheralIdentity {
    pub fn new(address: &str, address_type: AddressType) -> Self {
        Self {
            address: normalize_address(address),
            address_type,
        }
    }

    /// Build an identity from a 48-bit address as reported by the radio
    pub fn from_raw(address: u64, address_type: AddressType) -> Self {
        let bytes = address.to_be_bytes();
        let address = bytes[2..]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":");
        Self {
            address,
            address_type,
        }
    }

    /// The 48-bit address packed into the low bits of a `u64`
    pub fn raw_address(&self) -> Option<u64> {
        let hex: String = self.address.split(':').collect();
        if hex.len() != 12 {
            return None;
        }
        u64::from_str_radix(&hex, 16).ok()
    }

    pub fn matches_address(&self, address: &str) -> bool {
        self.address == normalize_address(address)
    }
}

impl fmt::Display for PeripheralIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.address_type)
    }
}

fn normalize_address(address: &str) -> String {
    address.trim().replace('-', ":").to_lowercase()
}

/// Snapshot of the advertisement delivered with a discovery event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    pub local_name: Option<String>,
    /// Raw manufacturer specific data: little-endian company id, then vendor bytes
    pub manufacturer_data: Option<Vec<u8>>,
}

impl Advertisement {
    /// Local name, absent names match as the empty string
    pub fn name_or_empty(&self) -> &str {
        self.local_name.as_deref().unwrap_or("")
    }

    pub fn manufacturer(&self) -> Option<ManufacturerData> {
        self.manufacturer_data
            .as_deref()
            .and_then(ManufacturerData::parse)
    }
}

/// Manufacturer data split into the fields the explorer reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManufacturerData {
    pub company_id: u16,
    pub data_type: u8,
    pub payload: Vec<u8>,
}

impl ManufacturerData {
    /// Returns `None` when fewer than three bytes are present
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < 3 {
            return None;
        }
        Some(Self {
            company_id: u16::from_le_bytes([raw[0], raw[1]]),
            data_type: raw[2],
            payload: raw[3..].to_vec(),
        })
    }

    pub fn payload_hex(&self) -> String {
        hex_string(&self.payload)
    }
}

/// Bytes as space separated hex pairs
pub fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Radio power state as reported by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unknown,
    PoweredOff,
    PoweringOn,
    PoweringOff,
    PoweredOn,
    Unsupported,
    Unauthorized,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::PoweredOff => "poweredOff",
            Self::PoweringOn => "poweringOn",
            Self::PoweringOff => "poweringOff",
            Self::PoweredOn => "poweredOn",
            Self::Unsupported => "unsupported",
            Self::Unauthorized => "unauthorized",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Inputs that move a session's connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectRequested,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn apply(self, event: LinkEvent) -> Self {
        match (self, event) {
            (Self::Disconnected, LinkEvent::ConnectRequested) => Self::Connecting,
            (state, LinkEvent::ConnectRequested) => state,
            (_, LinkEvent::Connected) => Self::Connected,
            (_, LinkEvent::Disconnected) => Self::Disconnected,
        }
    }
}

/// Characteristic capability flags, bit layout as in the GATT declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const BROADCAST: Self = Self(0x01);
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);
    pub const AUTHENTICATED_SIGNED_WRITES: Self = Self(0x40);
    pub const EXTENDED_PROPERTIES: Self = Self(0x80);

    const NAMES: [(Self, &'static str); 8] = [
        (Self::BROADCAST, "broadcast"),
        (Self::READ, "read"),
        (Self::WRITE_WITHOUT_RESPONSE, "writeWithoutResponse"),
        (Self::WRITE, "write"),
        (Self::NOTIFY, "notify"),
        (Self::INDICATE, "indicate"),
        (Self::AUTHENTICATED_SIGNED_WRITES, "authenticatedSignedWrites"),
        (Self::EXTENDED_PROPERTIES, "extendedProperties"),
    ];

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Flag names in bit order
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    /// True when the set holds exactly one flag and it is notify or indicate
    pub fn is_push_only(self) -> bool {
        self == Self::NOTIFY || self == Self::INDICATE
    }
}

impl BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Serialize for CharacteristicProperties {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorNode {
    pub uuid: Uuid,
    pub kind: Option<&'static str>,
    pub name: Option<&'static str>,
}

impl DescriptorNode {
    pub fn new(uuid: Uuid) -> Self {
        let assigned = assigned_numbers::descriptor(&uuid);
        Self {
            uuid,
            kind: assigned.map(|a| a.kind),
            name: assigned.map(|a| a.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicNode {
    pub uuid: Uuid,
    pub kind: Option<&'static str>,
    pub name: Option<&'static str>,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<DescriptorNode>,
    pub subscribed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNode {
    pub uuid: Uuid,
    pub kind: Option<&'static str>,
    pub name: Option<&'static str>,
    pub characteristics: Vec<CharacteristicNode>,
}

impl ServiceNode {
    pub fn new(uuid: Uuid, characteristics: Vec<CharacteristicNode>) -> Self {
        let assigned: Option<AssignedName> = assigned_numbers::service(&uuid);
        Self {
            uuid,
            kind: assigned.map(|a| a.kind),
            name: assigned.map(|a| a.name),
            characteristics,
        }
    }
}

/// A value pushed by, or read from, a characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChange {
    pub payload: Vec<u8>,
    /// False when the value came back from a direct read
    pub is_notification: bool,
}

/// Everything the adapter reports outside of request/response calls
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    StateChanged(AdapterState),
    ScanStarted,
    ScanStopped,
    Discovered {
        identity: PeripheralIdentity,
        advertisement: Advertisement,
    },
    Connected(PeripheralIdentity),
    Disconnected(PeripheralIdentity),
}
