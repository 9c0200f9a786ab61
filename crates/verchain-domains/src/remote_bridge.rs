//! The `RemoteBridge` RPC service.
//!
//! Every version migrates the peripheral variables carried by
//! `forward_set_variables_request` and `forward_notification` through the
//! peripheral catalog at that version. Two versions also backfill device
//! fields introduced with them.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use verchain::{
    Context, Direction, HookError, Manifest, MigrateError, PeripheralCatalog, PeripheralContext,
    Record, Role, ServiceDomain, ServiceKey, VariableState, Version,
};

use crate::device::{guess_device_type, Device};
use crate::variables::{
    apply_migrations, modified_to_map, update_modified_variables, update_variables_map,
    ChangeSet, ModifiedVariable,
};
use crate::{from_record, to_record};

pub const NAME: &str = "RemoteBridge";

pub const FORWARD_SET_VARIABLES: &str = "forward_set_variables_request";
pub const FORWARD_NOTIFICATION: &str = "forward_notification";

/// First version whose devices carry a timestamp.
pub const DEVICE_TIMESTAMP_VERSION: &str = "20180420";
/// First version whose devices carry a type and version.
pub const DEVICE_TYPE_VERSION: &str = "20200923";
/// First version that offers the synchronize-home API.
pub const SYNCHRONIZE_HOME_SUPPORTED: &str = "20230702";
/// First version that requires the synchronize-home API.
pub const SYNCHRONIZE_HOME_REQUIRED: &str = "20230704";

/// True if a peer at `version` can use the synchronize-home API.
pub fn supports_synchronize_home(version: &Version) -> bool {
    version.as_str() >= SYNCHRONIZE_HOME_SUPPORTED
}

/// True if a peer at `version` must use the synchronize-home API.
pub fn requires_synchronize_home(version: &Version) -> bool {
    version.as_str() >= SYNCHRONIZE_HOME_REQUIRED
}

#[derive(Debug, Serialize, Deserialize)]
struct SetVariablesArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
    peripheral_name: String,
    #[serde(default)]
    variables: BTreeMap<String, Option<String>>,
    #[serde(default)]
    last_set_timestamps: BTreeMap<String, i64>,
    #[serde(flatten)]
    extra: Record,
}

#[derive(Debug, Serialize, Deserialize)]
struct SetVariablesResponse {
    #[serde(default)]
    modified_variables: Vec<ModifiedVariable>,
    #[serde(flatten)]
    extra: Record,
}

#[derive(Debug, Serialize, Deserialize)]
struct NotificationArgs {
    notification: Notification,
    #[serde(flatten)]
    extra: Record,
}

#[derive(Debug, Serialize, Deserialize)]
struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    updated_device: Device,
    #[serde(default)]
    modified_peripherals: Vec<ModifiedPeripheral>,
    #[serde(flatten)]
    extra: Record,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModifiedPeripheral {
    peripheral_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified_variables: Option<Vec<ModifiedVariable>>,
    #[serde(flatten)]
    extra: Record,
}

type Hook = Box<dyn Fn(Record, &Context) -> Result<Record, HookError> + Send + Sync>;

/// Build the service chain over `catalog`.
pub fn build(
    manifest: &Manifest,
    catalog: Arc<PeripheralCatalog>,
) -> Result<ServiceDomain, MigrateError> {
    let versions = manifest.domain(NAME)?.versions()?;
    let timestamp_version: Version = DEVICE_TIMESTAMP_VERSION.parse()?;
    let type_version: Version = DEVICE_TYPE_VERSION.parse()?;

    let mut builder = ServiceDomain::builder(NAME).versions(versions.iter().cloned());
    for version in versions {
        for direction in [Direction::Up, Direction::Down] {
            builder = builder
                .hook(
                    version.clone(),
                    ServiceKey::new(FORWARD_SET_VARIABLES, direction, Role::Args),
                    set_variables_args(catalog.clone(), version.clone(), direction),
                )
                .hook(
                    version.clone(),
                    ServiceKey::new(FORWARD_SET_VARIABLES, direction, Role::Response),
                    set_variables_response(catalog.clone(), version.clone(), direction),
                );
        }

        builder = builder.hook(
            version.clone(),
            ServiceKey::args_down(FORWARD_NOTIFICATION),
            notification_args(catalog.clone(), version.clone(), Direction::Down),
        );

        // Device backfills only run on upgrade.
        let upgrade = notification_args(catalog.clone(), version.clone(), Direction::Up);
        let upgrade: Hook = if version == timestamp_version {
            Box::new(move |args: Record, ctx: &Context| {
                fill_device_timestamp(upgrade(args, ctx)?)
            })
        } else if version == type_version {
            let stamp = version.clone();
            Box::new(move |args: Record, ctx: &Context| {
                fill_device_type(upgrade(args, ctx)?, &stamp)
            })
        } else {
            Box::new(upgrade)
        };
        builder = builder.hook(version, ServiceKey::args_up(FORWARD_NOTIFICATION), upgrade);
    }

    let domain = builder.build()?;
    tracing::debug!(
        domain = NAME,
        oldest = %domain.oldest(),
        newest = %domain.newest(),
        "service chain built"
    );
    Ok(domain)
}

fn set_variables_args(
    catalog: Arc<PeripheralCatalog>,
    version: Version,
    direction: Direction,
) -> impl Fn(Record, &Context) -> Result<Record, HookError> + Send + Sync + 'static {
    move |args, ctx| {
        let mut args: SetVariablesArgs = from_record(args)?;
        let pctx = PeripheralContext::at(args.device_id.as_deref(), ctx.now_ms());
        let state = VariableState {
            variables: std::mem::take(&mut args.variables),
            timestamps: std::mem::take(&mut args.last_set_timestamps),
        };
        let migrated = catalog.step(&args.peripheral_name, &version, direction, state, &pctx)?;
        args.variables = migrated.variables;
        args.last_set_timestamps = migrated.timestamps;
        to_record(&args)
    }
}

/// Needs the request args in the context to know which peripheral the
/// variables belong to; without them the response passes through.
fn set_variables_response(
    catalog: Arc<PeripheralCatalog>,
    version: Version,
    direction: Direction,
) -> impl Fn(Record, &Context) -> Result<Record, HookError> + Send + Sync + 'static {
    move |response, ctx| {
        let Some(args) = ctx.args() else {
            return Ok(response);
        };
        let Some(peripheral) = args.get("peripheral_name").and_then(Value::as_str) else {
            return Ok(response);
        };
        let device_id = args.get("device_id").and_then(Value::as_str);
        let pctx = PeripheralContext::at(device_id, ctx.now_ms());

        let mut view: SetVariablesResponse = from_record(response.clone())?;
        let variables = modified_to_map(&view.modified_variables);
        let changes =
            apply_migrations(&catalog, peripheral, &version, direction, &variables, &pctx)?;
        if changes.is_empty() {
            return Ok(response);
        }
        view.modified_variables = update_modified_variables(view.modified_variables, &changes);
        to_record(&view)
    }
}

fn notification_args(
    catalog: Arc<PeripheralCatalog>,
    version: Version,
    direction: Direction,
) -> impl Fn(Record, &Context) -> Result<Record, HookError> + Send + Sync + 'static {
    move |args, ctx| {
        let mut view: NotificationArgs = from_record(args.clone())?;
        if migrate_notification(&catalog, &version, direction, &mut view.notification, ctx)? {
            to_record(&view)
        } else {
            Ok(args)
        }
    }
}

/// Migrate every variable list in a notification. Returns whether anything
/// changed.
fn migrate_notification(
    catalog: &PeripheralCatalog,
    version: &Version,
    direction: Direction,
    notification: &mut Notification,
    ctx: &Context,
) -> Result<bool, HookError> {
    let device = &mut notification.updated_device;
    let pctx = PeripheralContext::at(Some(device.id.as_str()), ctx.now_ms());
    let mut changed = false;

    for (name, peripheral) in device.peripherals.iter_mut().flatten() {
        let variables = &peripheral.variables;
        let changes = apply_migrations(catalog, name, version, direction, variables, &pctx)?;
        if !changes.is_empty() {
            peripheral.variables =
                update_variables_map(std::mem::take(&mut peripheral.variables), &changes);
            changed = true;
        }

        if let Some(deleted) = peripheral.deleted_variables.take() {
            let variables = modified_to_map(&deleted);
            let changes = apply_migrations(catalog, name, version, direction, &variables, &pctx)?;
            changed |= !changes.is_empty();
            peripheral.deleted_variables = Some(merge_modified(deleted, &changes));
        }
    }

    for peripheral in &mut notification.modified_peripherals {
        let Some(modified) = peripheral.modified_variables.take() else {
            continue;
        };
        let changes = apply_migrations(
            catalog,
            &peripheral.peripheral_id,
            version,
            direction,
            &modified_to_map(&modified),
            &pctx,
        )?;
        changed |= !changes.is_empty();
        peripheral.modified_variables = Some(merge_modified(modified, &changes));
    }

    Ok(changed)
}

fn merge_modified(modified: Vec<ModifiedVariable>, changes: &ChangeSet) -> Vec<ModifiedVariable> {
    if changes.is_empty() {
        modified
    } else {
        update_modified_variables(modified, changes)
    }
}

/// 20180420: devices carry their own timestamp, defaulting to the
/// notification's.
fn fill_device_timestamp(args: Record) -> Result<Record, HookError> {
    let mut view: NotificationArgs = from_record(args.clone())?;
    let notification = &mut view.notification;
    if !notification.updated_device.missing_timestamp() {
        return Ok(args);
    }
    notification.updated_device.timestamp = notification.timestamp;
    to_record(&view)
}

/// 20200923: devices carry their type and schema version.
fn fill_device_type(args: Record, version: &Version) -> Result<Record, HookError> {
    let mut view: NotificationArgs = from_record(args.clone())?;
    let device = &mut view.notification.updated_device;
    if device.device_type.is_some() {
        return Ok(args);
    }
    device.device_type = Some(guess_device_type(&device.id));
    device.version = Some(version.to_string());
    to_record(&view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;
    use serde_json::json;

    fn v(label: &str) -> Version {
        Version::new(label).unwrap()
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn domain() -> &'static ServiceDomain {
        crate::remote_bridge().unwrap()
    }

    #[test]
    fn every_version_has_hooks_for_both_operations() {
        let domain = domain();
        let plan = domain
            .plan(FORWARD_NOTIFICATION, Role::Args, &v("20180221"), &v("20230704"))
            .unwrap();
        assert_eq!(plan.len(), 11);
        assert!(plan.iter().all(|hop| hop.overridden));
    }

    #[test]
    fn synchronize_home_gates() {
        assert!(!supports_synchronize_home(&v("20200923")));
        assert!(supports_synchronize_home(&v("20230702")));
        assert!(!requires_synchronize_home(&v("20230702")));
        assert!(requires_synchronize_home(&v("20230704")));
    }

    #[test]
    fn set_variables_args_round_trip() {
        let args = record(json!({
            "device_id": "dev",
            "peripheral_name": "switch_0",
            "variables": { "room_id": "den", "brightness": "40" },
            "last_set_timestamps": { "room_id": 5 },
            "request_id": 17,
        }));
        let ctx = Context::at(0);
        let up = domain()
            .migrate_args(FORWARD_SET_VARIABLES, &v("20180221"), &v("20230704"), args.clone(), &ctx)
            .unwrap();
        assert_eq!(up["variables"]["room_assignment"], r#"{"room_ids":["den"]}"#);
        assert_eq!(up["last_set_timestamps"]["room_assignment"], 5);
        assert_eq!(up["request_id"], 17);

        let down = domain()
            .migrate_args(FORWARD_SET_VARIABLES, &v("20230704"), &v("20180221"), up, &ctx)
            .unwrap();
        assert_eq!(down, args);
    }

    #[test]
    fn response_uses_request_args_from_context() {
        let response = record(json!({
            "modified_variables": [{
                "variable_name": "room_id",
                "variable": { "name": "room_id", "value": "den", "timestamp": 5 }
            }]
        }));
        let without_args = domain()
            .migrate_response(FORWARD_SET_VARIABLES, &v("20180420"), &v("20180620"), response.clone(), &Context::at(0))
            .unwrap();
        assert_eq!(without_args, response);

        let ctx = Context::at(0).with_args(record(json!({ "peripheral_name": "switch_0" })));
        let migrated = domain()
            .migrate_response(FORWARD_SET_VARIABLES, &v("20180420"), &v("20180620"), response, &ctx)
            .unwrap();
        let modified = migrated["modified_variables"].as_array().unwrap();
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0]["variable_name"], "room_assignment");
        assert_eq!(modified[0]["variable"]["externally_settable"], true);
        assert_eq!(modified[0]["variable"]["timestamp"], 5);
    }

    fn notification(device: Value) -> Record {
        record(json!({
            "notification": {
                "timestamp": 1234,
                "updated_device": device,
                "modified_peripherals": [{
                    "peripheral_id": "motion_detection",
                    "modified_variables": [{
                        "variable_name": "trigger_screen",
                        "variable": { "name": "trigger_screen", "value": "1", "timestamp": 9 }
                    }]
                }]
            }
        }))
    }

    #[test]
    fn notification_backfills_device_fields() {
        let args = notification(json!({
            "id": "0123456789abcdef0123",
            "peripherals": {
                "switch_0": {
                    "variables": {
                        "room_id": { "name": "room_id", "value": "den", "timestamp": 3 }
                    }
                }
            }
        }));
        let out = domain()
            .migrate_args(FORWARD_NOTIFICATION, &v("20180221"), &v("20200923"), args, &Context::at(0))
            .unwrap();

        let device = &out["notification"]["updated_device"];
        assert_eq!(device["timestamp"], 1234);
        assert_eq!(device["device_type"], json!(DeviceType::MobileApp));
        assert_eq!(device["version"], "20200923");

        let variables = &device["peripherals"]["switch_0"]["variables"];
        assert!(variables.get("room_id").is_none());
        assert_eq!(variables["room_assignment"]["value"], r#"{"room_ids":["den"]}"#);

        let modified = out["notification"]["modified_peripherals"][0]["modified_variables"]
            .as_array()
            .unwrap();
        let names: Vec<_> = modified.iter().map(|m| m["variable_name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["trigger_screen", "trigger_screen_off"]);
        assert_eq!(modified[1]["variable"]["timestamp"], 9);
    }

    #[test]
    fn existing_device_fields_are_kept() {
        let args = notification(json!({
            "id": "dev",
            "timestamp": 77,
            "device_type": "CONTROL",
        }));
        let out = domain()
            .migrate_args(FORWARD_NOTIFICATION, &v("20180221"), &v("20200923"), args, &Context::at(0))
            .unwrap();
        let device = &out["notification"]["updated_device"];
        assert_eq!(device["timestamp"], 77);
        assert_eq!(device["device_type"], "CONTROL");
        assert!(device.get("version").is_none());
    }

    #[test]
    fn notification_without_changes_is_returned_as_is() {
        let args = record(json!({
            "notification": {
                "updated_device": { "id": "dev", "timestamp": 1, "unknown": [1, 2] },
            },
            "trace": "abc",
        }));
        let out = domain()
            .migrate_args(FORWARD_NOTIFICATION, &v("20180808"), &v("20180925"), args.clone(), &Context::at(0))
            .unwrap();
        assert_eq!(out, args);
    }

    #[test]
    fn scene_downgrade_drops_locked_scenes_and_restores_playing() {
        let party = json!({
            "actions": [{ "peripheral_name": "sonos_0", "variables": { "play_uri": "x-sonos:1" } }]
        });
        let locked = json!({ "actions": [], "editable": false });
        let args = record(json!({
            "device_id": "dev",
            "peripheral_name": "scene_config",
            "variables": { "scene:party": party.to_string(), "scene:locked": locked.to_string() },
            "last_set_timestamps": { "scene:party": 10, "scene:locked": 11 },
        }));
        let down = domain()
            .migrate_args(FORWARD_SET_VARIABLES, &v("20181005"), &v("20180420"), args, &Context::at(0))
            .unwrap();

        assert!(down["variables"].get("scene:locked").is_none());
        assert!(down["last_set_timestamps"].get("scene:locked").is_none());
        let party: Value =
            serde_json::from_str(down["variables"]["scene:party"].as_str().unwrap()).unwrap();
        assert_eq!(party["actions"][0]["variables"]["playing"], "1");
        assert_eq!(down["last_set_timestamps"]["scene:party"], 10);

        let up = domain()
            .migrate_args(FORWARD_SET_VARIABLES, &v("20180420"), &v("20181005"), down, &Context::at(0))
            .unwrap();
        let party: Value =
            serde_json::from_str(up["variables"]["scene:party"].as_str().unwrap()).unwrap();
        assert_eq!(party["actions"][0]["variables"], json!({ "play_uri": "x-sonos:1" }));
    }

    #[test]
    fn malformed_args_fail_with_hop() {
        let args = record(json!({ "variables": {} }));
        let err = domain()
            .migrate_args(FORWARD_SET_VARIABLES, &v("20180221"), &v("20180420"), args, &Context::at(0))
            .unwrap_err();
        match err {
            MigrateError::HookExecution { version, operation, .. } => {
                assert_eq!(version, v("20180420"));
                assert_eq!(operation, FORWARD_SET_VARIABLES);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
