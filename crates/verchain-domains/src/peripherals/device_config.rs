//! Per-device configuration: gesture settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use verchain::{
    DomainManifest, HookError, MigrateError, PeripheralContext, PeripheralDomain,
    PeripheralDomainBuilder, Record, VariableState, Version,
};

pub const NAME: &str = "device_config";

const GESTURE_CONFIGS: &str = "gesture_configs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GestureType {
    One,
    Two,
    Three,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureConfig {
    pub gesture_type: GestureType,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub peripheral_id: Option<String>,
    #[serde(flatten)]
    pub extra: Record,
}

/// Serialized into the `gesture_configs` variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GestureConfigs {
    #[serde(default)]
    pub gesture_configs: BTreeMap<GestureType, Vec<GestureConfig>>,
}

pub fn chain(declared: &DomainManifest) -> Result<PeripheralDomainBuilder, MigrateError> {
    let two_finger: Version = "20190130".parse()?;
    // 20190204 reapplies the 20190130 upgrade and has no downgrade.
    let reapply: Version = "20190204".parse()?;
    Ok(PeripheralDomain::builder(NAME)
        .versions(declared.versions()?)
        .up(two_finger.clone(), add_two_finger_gesture)
        .down(two_finger, remove_two_finger_gesture)
        .up(reapply, add_two_finger_gesture))
}

fn read_configs(state: &VariableState) -> Result<Option<GestureConfigs>, HookError> {
    match state.value(GESTURE_CONFIGS) {
        Some(raw) if !raw.is_empty() => Ok(Some(serde_json::from_str(raw)?)),
        _ => Ok(None),
    }
}

/// Enable the two-finger gesture on devices that lack it.
fn add_two_finger_gesture(
    mut state: VariableState,
    ctx: &PeripheralContext,
) -> Result<VariableState, HookError> {
    let Some(mut configs) = read_configs(&state)? else {
        return Ok(state);
    };
    let has_two = configs
        .gesture_configs
        .get(&GestureType::Two)
        .is_some_and(|c| !c.is_empty());
    if !has_two {
        configs.gesture_configs.insert(
            GestureType::Two,
            vec![GestureConfig {
                gesture_type: GestureType::Two,
                device_id: ctx.device_id.clone(),
                peripheral_id: Some(NAME.to_owned()),
                extra: Record::new(),
            }],
        );
        state.set(
            GESTURE_CONFIGS,
            Some(serde_json::to_string(&configs)?),
            Some(ctx.now_ms),
        );
    }
    Ok(state)
}

fn remove_two_finger_gesture(
    mut state: VariableState,
    _: &PeripheralContext,
) -> Result<VariableState, HookError> {
    let Some(mut configs) = read_configs(&state)? else {
        return Ok(state);
    };
    let had_two = configs
        .gesture_configs
        .remove(&GestureType::Two)
        .is_some_and(|c| !c.is_empty());
    if had_two {
        state
            .variables
            .insert(GESTURE_CONFIGS.to_owned(), Some(serde_json::to_string(&configs)?));
    }
    Ok(state)
}
