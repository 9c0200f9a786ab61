//! # verchain-domains
//!
//! The version chains of the home automation message bus: the
//! `RemoteBridge` RPC service, the `SavedDevices` record store, the
//! provisioning services and the per-peripheral variable migrations they
//! delegate to.
//!
//! Every domain is built on first use and shared for the life of the
//! process. A domain that fails to build returns the same error to every
//! caller.
//!
//! ```
//! use serde_json::json;
//! use verchain::{Context, Version};
//!
//! let bridge = verchain_domains::remote_bridge().unwrap();
//! let args = json!({
//!     "device_id": "dev",
//!     "peripheral_name": "switch_0",
//!     "variables": { "room_id": "den" },
//!     "last_set_timestamps": { "room_id": 5 },
//! });
//! let migrated = bridge
//!     .migrate_args(
//!         verchain_domains::remote_bridge::FORWARD_SET_VARIABLES,
//!         &Version::new("20180420").unwrap(),
//!         &Version::new("20180620").unwrap(),
//!         args.as_object().cloned().unwrap(),
//!         &Context::new(),
//!     )
//!     .unwrap();
//! assert_eq!(migrated["variables"]["room_assignment"], r#"{"room_ids":["den"]}"#);
//! ```

pub mod device;
pub mod device_provisioning;
pub mod peripherals;
pub mod property_installations;
pub mod remote_bridge;
pub mod saved_devices;
pub mod variables;

use std::sync::{Arc, OnceLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use verchain::{HookError, Manifest, MigrateError, PeripheralCatalog, Record, ServiceDomain};

pub use device::{guess_device_type, Device, DeviceType, Peripheral};
pub use variables::{ChangeSet, ModifiedVariable, Variable, VariableMap};

/// Declared versions of every domain in this crate.
pub const VERSIONS_TOML: &str = include_str!("versions.toml");

static MANIFEST: OnceLock<Result<Manifest, MigrateError>> = OnceLock::new();
static PERIPHERALS: OnceLock<Result<Arc<PeripheralCatalog>, MigrateError>> = OnceLock::new();
static REMOTE_BRIDGE: OnceLock<Result<ServiceDomain, MigrateError>> = OnceLock::new();
static SAVED_DEVICES: OnceLock<Result<ServiceDomain, MigrateError>> = OnceLock::new();
static PROPERTY_INSTALLATIONS: OnceLock<Result<ServiceDomain, MigrateError>> = OnceLock::new();
static DEVICE_PROVISIONING: OnceLock<Result<ServiceDomain, MigrateError>> = OnceLock::new();

fn cached<T>(
    cell: &'static OnceLock<Result<T, MigrateError>>,
    init: impl FnOnce() -> Result<T, MigrateError>,
) -> Result<&'static T, MigrateError> {
    cell.get_or_init(init).as_ref().map_err(Clone::clone)
}

/// The bundled version manifest.
pub fn manifest() -> Result<&'static Manifest, MigrateError> {
    cached(&MANIFEST, || Ok(Manifest::from_toml_str(VERSIONS_TOML)?))
}

/// Every peripheral chain.
pub fn peripherals() -> Result<Arc<PeripheralCatalog>, MigrateError> {
    cached(&PERIPHERALS, || {
        peripherals::catalog(manifest()?).map(Arc::new)
    })
    .cloned()
}

/// The `RemoteBridge` service chain.
pub fn remote_bridge() -> Result<&'static ServiceDomain, MigrateError> {
    cached(&REMOTE_BRIDGE, || remote_bridge::build(manifest()?, peripherals()?))
}

/// The `SavedDevices` record chain.
pub fn saved_devices() -> Result<&'static ServiceDomain, MigrateError> {
    cached(&SAVED_DEVICES, || saved_devices::build(manifest()?, peripherals()?))
}

/// The `PropertyInstallations` service chain.
pub fn property_installations() -> Result<&'static ServiceDomain, MigrateError> {
    cached(&PROPERTY_INSTALLATIONS, || {
        property_installations::build(manifest()?, peripherals()?)
    })
}

/// The `DeviceProvisioning` service chain.
pub fn device_provisioning() -> Result<&'static ServiceDomain, MigrateError> {
    cached(&DEVICE_PROVISIONING, || device_provisioning::build(manifest()?))
}

/// Read a record through a typed view.
pub(crate) fn from_record<T: DeserializeOwned>(record: Record) -> Result<T, HookError> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

/// Write a typed view back to a record.
pub(crate) fn to_record<T: Serialize>(view: &T) -> Result<Record, HookError> {
    match serde_json::to_value(view)? {
        Value::Object(record) => Ok(record),
        other => Err(HookError::new(format!("expected a record, got {other}"))),
    }
}
