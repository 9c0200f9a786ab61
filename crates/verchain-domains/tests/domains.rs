//! End-to-end migrations through the bundled domains.

use std::sync::Once;

use proptest::prelude::*;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;
use verchain::{Context, Record, Role, Version};
use verchain_domains::peripherals::{device_config, example, lifx, motion, scene_config};
use verchain_domains::{device_provisioning, property_installations, remote_bridge, saved_devices};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

fn v(label: &str) -> Version {
    Version::new(label).unwrap()
}

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

fn set_variables(peripheral: &str, variables: Value, timestamps: Value) -> Record {
    record(json!({
        "device_id": "0123456789abcdef0123",
        "peripheral_name": peripheral,
        "variables": variables,
        "last_set_timestamps": timestamps,
    }))
}

#[test]
fn manifest_declares_every_domain() {
    let manifest = verchain_domains::manifest().unwrap();
    for name in [
        remote_bridge::NAME,
        saved_devices::NAME,
        property_installations::NAME,
        device_provisioning::NAME,
        example::NAME,
        motion::NAME,
        lifx::NAME,
        device_config::NAME,
        scene_config::NAME,
    ] {
        assert!(manifest.domain(name).is_ok(), "{name}");
    }
    let bridge = verchain_domains::remote_bridge().unwrap();
    assert_eq!(bridge.oldest(), &v("20180221"));
    assert_eq!(bridge.newest(), &v("20230704"));
}

fn stored_peripheral(name: &str, variables: Value) -> Record {
    record(json!({
        "device_id": "0123456789abcdef0123",
        "peripherals": [{ "name": name, "variables": variables }],
    }))
}

#[test]
fn example_peripheral_is_not_crossed_by_service_hops() {
    init_tracing();
    // The example peripheral only changed at the oldest service version, so
    // no hop between declared versions runs its hooks.
    let bridge = verchain_domains::remote_bridge().unwrap();
    let args = set_variables(
        example::NAME,
        json!({ "temperature": "212" }),
        json!({ "temperature": 8 }),
    );
    let down = bridge
        .migrate_args(
            remote_bridge::FORWARD_SET_VARIABLES,
            &v("20180420"),
            &v("20180221"),
            args.clone(),
            &Context::new(),
        )
        .unwrap();
    assert_eq!(down, args);
}

#[test]
fn lifx_upgrade_adds_oauth_defaults() {
    init_tracing();
    let store = verchain_domains::saved_devices().unwrap();
    let out = store
        .migrate_args(
            saved_devices::MIGRATE_PERIPHERAL,
            &v("20190614"),
            &v("20190903"),
            stored_peripheral(lifx::NAME, json!({})),
            &Context::at(99),
        )
        .unwrap();
    let variables = &out["peripherals"][0]["variables"];
    assert_eq!(variables["access_token"]["value"], "");
    assert_eq!(variables["expiration_date"]["value"], "0");
    assert_eq!(variables["refresh_token"]["value"], "");
    assert_eq!(variables["access_token"]["timestamp"], 99);
    assert_eq!(variables["access_token"]["externally_settable"], true);
}

#[test]
fn device_config_gains_two_finger_gesture() {
    init_tracing();
    let store = verchain_domains::saved_devices().unwrap();
    let configs = json!({
        "gesture_configs": { "ONE": [{ "gesture_type": "ONE", "peripheral_id": device_config::NAME }] }
    })
    .to_string();
    let args = stored_peripheral(
        device_config::NAME,
        json!({ "gesture_configs": { "name": "gesture_configs", "value": configs, "timestamp": 1 } }),
    );
    let out = store
        .migrate_args(
            saved_devices::MIGRATE_PERIPHERAL,
            &v("20181018"),
            &v("20190204"),
            args,
            &Context::at(42),
        )
        .unwrap();
    let variable = &out["peripherals"][0]["variables"]["gesture_configs"];
    assert_eq!(variable["timestamp"], 42);
    let migrated: device_config::GestureConfigs =
        serde_json::from_str(variable["value"].as_str().unwrap()).unwrap();
    let two = &migrated.gesture_configs[&device_config::GestureType::Two];
    assert_eq!(two.len(), 1);
    assert_eq!(two[0].device_id.as_deref(), Some("0123456789abcdef0123"));
}

#[test]
fn saved_device_peripherals_reach_newest_version() {
    init_tracing();
    let store = verchain_domains::saved_devices().unwrap();
    let args = record(json!({
        "device_id": "dev",
        "peripherals": [
            { "name": motion::NAME, "variables": {
                "trigger_screen": { "name": "trigger_screen", "value": "1", "timestamp": 3 }
            }},
            { "name": "switch_0", "variables": {}, "version": "20180221" },
        ]
    }));
    let plan = store
        .plan(saved_devices::MIGRATE_PERIPHERAL, Role::Args, &v("20180221"), &v("20200923"))
        .unwrap();
    assert_eq!(plan.len(), 13);

    let out = store
        .migrate_args(
            saved_devices::MIGRATE_PERIPHERAL,
            &v("20180221"),
            &v("20200923"),
            args,
            &Context::at(0),
        )
        .unwrap();
    let peripherals = out["peripherals"].as_array().unwrap();
    assert!(peripherals.iter().all(|p| p["version"] == "20200923"));
    assert_eq!(peripherals[0]["variables"]["trigger_screen_off"]["value"], "1");
    assert_eq!(peripherals[0]["variables"]["trigger_screen_off"]["timestamp"], 3);
}

#[test]
fn stored_scenes_gain_validity_states() {
    init_tracing();
    let store = verchain_domains::saved_devices().unwrap();
    let party = json!({
        "actions": [{
            "peripheral_name": "sonos_0",
            "variables": { "playing": "1", "play_uri": "x-sonos:1" }
        }]
    })
    .to_string();
    let args = stored_peripheral(
        scene_config::NAME,
        json!({ "scene:party": { "name": "scene:party", "value": party, "timestamp": 4 } }),
    );
    let out = store
        .migrate_args(
            saved_devices::MIGRATE_PERIPHERAL,
            &v("20180620"),
            &v("20190412"),
            args,
            &Context::at(55),
        )
        .unwrap();
    let variables = &out["peripherals"][0]["variables"];

    let party: scene_config::Scene =
        serde_json::from_str(variables["scene:party"]["value"].as_str().unwrap()).unwrap();
    assert!(!party.actions[0].variables.contains_key("playing"));
    assert_eq!(variables["scene:party"]["timestamp"], 4);

    let validity = &variables["scene_validity_states"];
    assert_eq!(validity["value"], r#"{"scene_validity_states":{}}"#);
    assert_eq!(validity["timestamp"], 55);
    assert_eq!(validity["externally_settable"], true);
}

#[test]
fn stored_record_is_retagged() {
    init_tracing();
    let store = verchain_domains::saved_devices().unwrap();
    let body = json!({ "devices": [{ "id": "cloud_virtual_device", "timestamp": 5 }] });
    let bytes = verchain::VersionedEnvelope::new(v("20190903"), serde_json::to_vec(&body).unwrap())
        .to_bytes();

    let out = store
        .migrate_record_bytes(saved_devices::READ_STATE, &bytes, &v("20200923"), &Context::at(0))
        .unwrap();
    let envelope = verchain::VersionedEnvelope::from_bytes(&out).unwrap();
    assert_eq!(envelope.version, v("20200923"));
    let body: Value = serde_json::from_slice(&envelope.payload).unwrap();
    assert_eq!(body["devices"][0]["device_type"], "CLOUD");
}

fn room_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,11}"
}

/// Index of 20180620 in the bridge's version list.
const ROOM_ASSIGNMENT_INDEX: usize = 2;

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn room_assignment_round_trips(
        room in room_name(),
        ts in 0i64..1_000_000,
        low in 0..ROOM_ASSIGNMENT_INDEX,
        high in ROOM_ASSIGNMENT_INDEX - 1..12usize,
    ) {
        let bridge = verchain_domains::remote_bridge().unwrap();
        let manifest = verchain_domains::manifest().unwrap();
        let versions = manifest.domain(remote_bridge::NAME).unwrap().versions().unwrap();
        prop_assert_eq!(&versions[ROOM_ASSIGNMENT_INDEX], &v("20180620"));

        let args = set_variables(
            "switch_0",
            json!({ "room_id": room }),
            json!({ "room_id": ts }),
        );
        let ctx = Context::new();
        let op = remote_bridge::FORWARD_SET_VARIABLES;
        let up = bridge
            .migrate_args(op, &versions[low], &versions[high], args.clone(), &ctx)
            .unwrap();
        if high >= ROOM_ASSIGNMENT_INDEX {
            prop_assert!(up["variables"].get("room_id").is_none());
            prop_assert_eq!(&up["last_set_timestamps"]["room_assignment"], &json!(ts));
        } else {
            prop_assert_eq!(&up, &args);
        }

        let back = bridge
            .migrate_args(op, &versions[high], &versions[low], up, &ctx)
            .unwrap();
        prop_assert_eq!(back, args);
    }

    #[test]
    fn screen_trigger_round_trips(flag in prop::sample::select(vec!["0", "1"]), ts in 0i64..1_000) {
        let store = verchain_domains::saved_devices().unwrap();
        let device = json!({
            "id": "dev",
            "timestamp": 1,
            "peripherals": {
                (motion::NAME): {
                    "variables": {
                        "trigger_screen": {
                            "name": "trigger_screen",
                            "value": flag,
                            "timestamp": ts,
                            "externally_settable": false,
                        }
                    }
                }
            }
        });
        let args = record(json!({ "devices": [device] }));
        let ctx = Context::at(0);
        let op = saved_devices::READ_STATE;
        let up = store
            .migrate_args(op, &v("20181005"), &v("20181018"), args.clone(), &ctx)
            .unwrap();
        let variables = &up["devices"][0]["peripherals"][motion::NAME]["variables"];
        prop_assert_eq!(variables.get("trigger_screen_off").is_some(), flag == "1");

        let back = store
            .migrate_args(op, &v("20181018"), &v("20181005"), up, &ctx)
            .unwrap();
        prop_assert_eq!(back, args);
    }
}
