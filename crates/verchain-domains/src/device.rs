//! Device records and type inference for devices that predate the
//! `device_type` field.

use core::fmt;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use verchain::Record;

use crate::variables::{ModifiedVariable, VariableMap};

/// The cloud's own virtual device.
pub const CLOUD_VIRTUAL_DEVICE: &str = "cloud_virtual_device";
/// Bluetooth mesh bridge.
pub const BLE_MESH_VIRTUAL_DEVICE: &str = "ble_mesh_virtual_device";
/// Home-wide virtual device.
pub const BRILLIANT_VIRTUAL_DEVICE: &str = "brilliant_virtual_device";
/// Holds home configuration.
pub const CONFIGURATION_VIRTUAL_DEVICE: &str = "configuration_virtual_device";

/// Virtual devices standing in for third-party integrations.
pub const THIRDPARTY_VIRTUAL_DEVICES: &[&str] = &[
    "honeywell_virtual_device",
    "hue_virtual_device",
    "lifx_virtual_device",
    "ring_virtual_device",
    "schlage_virtual_device",
    "smartthings_virtual_device",
    "sonos_virtual_device",
];

/// ULID type tag of a control faceplate.
const FACEPLATE_ID_TYPE: u8 = 3;
/// ULID type tag of a virtual control.
const VIRTUAL_CONTROL_ID_TYPE: u8 = 16;

/// Mobile device ids are exactly this many hex digits.
const MOBILE_ID_LEN: usize = 20;

/// What kind of device an id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceType {
    Control,
    VirtualControl,
    Cloud,
    Virtual,
    ThirdpartyVirtual,
    MobileApp,
    Unknown,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Control => "control",
            Self::VirtualControl => "virtual control",
            Self::Cloud => "cloud",
            Self::Virtual => "virtual",
            Self::ThirdpartyVirtual => "third-party virtual",
            Self::MobileApp => "mobile app",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A device as stored and as sent in notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    /// Schema version the device record was last written at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peripherals: Option<BTreeMap<String, Peripheral>>,
    #[serde(flatten)]
    pub extra: Record,
}

/// One peripheral of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peripheral {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub variables: VariableMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_variables: Option<Vec<ModifiedVariable>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Record,
}

impl Device {
    /// True when the device has no usable timestamp.
    pub fn missing_timestamp(&self) -> bool {
        matches!(self.timestamp, None | Some(0))
    }
}

/// Infer the type of a device from the shape of its id.
///
/// Ids minted as typed ULIDs carry their type in bytes 6..8; well-known
/// virtual devices use fixed names; mobile apps use 20 hex digits. Any other
/// UUID is assumed to be a control.
pub fn guess_device_type(device_id: &str) -> DeviceType {
    let uuid = Uuid::parse_str(device_id).ok();

    if uuid.is_some_and(|u| has_id_type(&u, FACEPLATE_ID_TYPE)) {
        return DeviceType::Control;
    }
    if uuid.is_some_and(|u| has_id_type(&u, VIRTUAL_CONTROL_ID_TYPE)) {
        return DeviceType::VirtualControl;
    }
    if device_id == CLOUD_VIRTUAL_DEVICE {
        return DeviceType::Cloud;
    }
    if [
        BLE_MESH_VIRTUAL_DEVICE,
        BRILLIANT_VIRTUAL_DEVICE,
        CONFIGURATION_VIRTUAL_DEVICE,
    ]
    .contains(&device_id)
    {
        return DeviceType::Virtual;
    }
    if THIRDPARTY_VIRTUAL_DEVICES.contains(&device_id) {
        return DeviceType::ThirdpartyVirtual;
    }
    if is_mobile_device_id(device_id) {
        return DeviceType::MobileApp;
    }
    if uuid.is_some() {
        return DeviceType::Control;
    }

    tracing::warn!(device_id, "could not match device id to a device type");
    DeviceType::Unknown
}

/// True for 20-hex-digit mobile app ids.
pub fn is_mobile_device_id(device_id: &str) -> bool {
    device_id.len() == MOBILE_ID_LEN && device_id.bytes().all(|b| b.is_ascii_hexdigit())
}

fn has_id_type(uuid: &Uuid, id_type: u8) -> bool {
    let bytes = uuid.as_bytes();
    bytes[6] == 0 && bytes[7] == id_type
}
