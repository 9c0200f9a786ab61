//! The `SavedDevices` record store.
//!
//! Stored devices carry per-peripheral variable maps which are migrated
//! through the peripheral catalog at every version, exactly like the
//! variables forwarded by the remote bridge.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use verchain::{
    Context, Direction, HookError, Manifest, MigrateError, PeripheralCatalog, PeripheralContext,
    Record, ServiceDomain, ServiceKey, Version,
};

use crate::device::{guess_device_type, Device, Peripheral};
use crate::remote_bridge::{DEVICE_TIMESTAMP_VERSION, DEVICE_TYPE_VERSION};
use crate::variables::{apply_migrations, update_variables_map};
use crate::{from_record, to_record};

pub const NAME: &str = "SavedDevices";

/// Load every stored device.
pub const READ_STATE: &str = "read_state";
/// Store the peripherals of one device.
pub const MIGRATE_PERIPHERAL: &str = "migrate_peripheral";

#[derive(Debug, Serialize, Deserialize)]
struct ReadStateArgs {
    #[serde(default)]
    devices: Vec<Device>,
    #[serde(flatten)]
    extra: Record,
}

#[derive(Debug, Serialize, Deserialize)]
struct MigratePeripheralArgs {
    device_id: String,
    #[serde(default)]
    peripherals: Vec<Peripheral>,
    #[serde(flatten)]
    extra: Record,
}

/// Build the record chain over `catalog`.
pub fn build(
    manifest: &Manifest,
    catalog: Arc<PeripheralCatalog>,
) -> Result<ServiceDomain, MigrateError> {
    let versions = manifest.domain(NAME)?.versions()?;
    let timestamp_version: Version = DEVICE_TIMESTAMP_VERSION.parse()?;
    let type_version: Version = DEVICE_TYPE_VERSION.parse()?;

    let mut builder = ServiceDomain::builder(NAME).versions(versions.iter().cloned());
    let mut previous: Option<Version> = None;
    for version in &versions {
        let read_up = read_state(catalog.clone(), version.clone(), Direction::Up);
        let backfill = if *version == timestamp_version {
            Backfill::Timestamp
        } else if *version == type_version {
            Backfill::DeviceType(version.clone())
        } else {
            Backfill::None
        };
        builder = builder
            .hook(
                version.clone(),
                ServiceKey::args_up(READ_STATE),
                move |args: Record, ctx: &Context| backfill.apply(read_up(args, ctx)?, ctx),
            )
            .hook(
                version.clone(),
                ServiceKey::args_down(READ_STATE),
                read_state(catalog.clone(), version.clone(), Direction::Down),
            )
            .hook(
                version.clone(),
                ServiceKey::args_up(MIGRATE_PERIPHERAL),
                migrate_peripheral(catalog.clone(), version.clone(), Direction::Up, version.clone()),
            );

        // A down hop from the oldest version never happens.
        if let Some(landing) = previous.replace(version.clone()) {
            builder = builder.hook(
                version.clone(),
                ServiceKey::args_down(MIGRATE_PERIPHERAL),
                migrate_peripheral(catalog.clone(), version.clone(), Direction::Down, landing),
            );
        }
    }

    let domain = builder.build()?;
    tracing::debug!(
        domain = NAME,
        oldest = %domain.oldest(),
        newest = %domain.newest(),
        "record chain built"
    );
    Ok(domain)
}

/// Device fields introduced at a version and filled in on upgrade.
enum Backfill {
    None,
    Timestamp,
    DeviceType(Version),
}

impl Backfill {
    fn apply(&self, args: Record, ctx: &Context) -> Result<Record, HookError> {
        if matches!(self, Self::None) {
            return Ok(args);
        }
        let mut view: ReadStateArgs = from_record(args)?;
        for device in &mut view.devices {
            match self {
                Self::None => {}
                Self::Timestamp => {
                    if device.missing_timestamp() {
                        device.timestamp = Some(ctx.now_ms());
                    }
                }
                Self::DeviceType(version) => {
                    device.version = Some(version.to_string());
                    if device.device_type.is_none() {
                        device.device_type = Some(guess_device_type(&device.id));
                    }
                }
            }
        }
        to_record(&view)
    }
}

fn read_state(
    catalog: Arc<PeripheralCatalog>,
    version: Version,
    direction: Direction,
) -> impl Fn(Record, &Context) -> Result<Record, HookError> + Send + Sync + 'static {
    move |args, ctx| {
        let mut view: ReadStateArgs = from_record(args)?;
        for device in &mut view.devices {
            let pctx = PeripheralContext::at(Some(device.id.as_str()), ctx.now_ms());
            for (name, peripheral) in device.peripherals.iter_mut().flatten() {
                migrate_variables(&catalog, name, &version, direction, peripheral, &pctx)?;
            }
        }
        to_record(&view)
    }
}

/// Migrated peripherals are stamped with the version they land at: the
/// hook's own version on upgrade, its predecessor on downgrade.
fn migrate_peripheral(
    catalog: Arc<PeripheralCatalog>,
    version: Version,
    direction: Direction,
    landing: Version,
) -> impl Fn(Record, &Context) -> Result<Record, HookError> + Send + Sync + 'static {
    move |args, ctx| {
        let mut view: MigratePeripheralArgs = from_record(args)?;
        let pctx = PeripheralContext::at(Some(view.device_id.as_str()), ctx.now_ms());
        for peripheral in &mut view.peripherals {
            let name = peripheral
                .name
                .clone()
                .ok_or_else(|| HookError::field("peripherals[].name", "a peripheral name"))?;
            migrate_variables(&catalog, &name, &version, direction, peripheral, &pctx)?;
            peripheral.version = Some(landing.to_string());
        }
        to_record(&view)
    }
}

fn migrate_variables(
    catalog: &PeripheralCatalog,
    name: &str,
    version: &Version,
    direction: Direction,
    peripheral: &mut Peripheral,
    ctx: &PeripheralContext,
) -> Result<(), HookError> {
    let changes = apply_migrations(catalog, name, version, direction, &peripheral.variables, ctx)?;
    if !changes.is_empty() {
        peripheral.variables =
            update_variables_map(std::mem::take(&mut peripheral.variables), &changes);
    }
    Ok(())
}
