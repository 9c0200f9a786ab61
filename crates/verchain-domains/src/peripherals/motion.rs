//! Motion sensor configuration.

use serde::{Deserialize, Serialize};
use verchain::{
    DomainManifest, HookError, MigrateError, PeripheralContext, PeripheralDomain,
    PeripheralDomainBuilder, VariableState, Version,
};

pub const NAME: &str = "motion_detection";

/// Load peripheral whose motion settings moved into a config struct.
pub const GANGBOX_PERIPHERAL_ID: &str = "gangbox_peripheral_0";
/// Prefix of `light_motion_config:<device>:<peripheral>` variables.
pub const LIGHT_MOTION_CONFIG_PREFIX: &str = "light_motion_config:";

const TRIGGER_LIGHTS: &str = "trigger_lights";
const TRIGGER_LIGHTS_ON: &str = "trigger_lights_on";
const TRIGGER_LIGHTS_OFF: &str = "trigger_lights_off";
const TRIGGER_LIGHTS_OFF_TIMEOUT: &str = "trigger_lights_off_timeout_sec";
const TRIGGER_SCREEN: &str = "trigger_screen";
const TRIGGER_SCREEN_OFF: &str = "trigger_screen_off";

/// Serialized into a `light_motion_config:` variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightMotionConfig {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub peripheral_id: Option<String>,
    #[serde(default)]
    pub trigger_on: bool,
    #[serde(default)]
    pub trigger_off: bool,
    #[serde(default)]
    pub trigger_off_timeout_sec: i64,
}

pub fn chain(declared: &DomainManifest) -> Result<PeripheralDomainBuilder, MigrateError> {
    let multi_load: Version = "20180605".parse()?;
    let screen_off: Version = "20181018".parse()?;
    Ok(PeripheralDomain::builder(NAME)
        .versions(declared.versions()?)
        .up(multi_load.clone(), merge_light_variables)
        .down(multi_load, split_light_config)
        .up(screen_off.clone(), add_screen_off)
        .down(screen_off, remove_screen_off))
}

/// Name of the light motion config variable for the gangbox load of
/// `device_id`.
pub fn light_config_variable(device_id: &str) -> String {
    format!("{LIGHT_MOTION_CONFIG_PREFIX}{device_id}:{GANGBOX_PERIPHERAL_ID}")
}

fn parse_flag(name: &str, value: Option<&str>) -> Result<bool, HookError> {
    match value {
        None => Ok(false),
        Some(raw) => raw
            .parse::<i64>()
            .map(|n| n != 0)
            .map_err(|_| HookError::field(name, "an integer flag")),
    }
}

/// 20180605: motion settings for the gangbox load moved from four flat
/// variables into one `LightMotionConfig`. A disabled trigger is stored as
/// the config's absence. Needs the migrating device's id.
fn merge_light_variables(
    mut state: VariableState,
    ctx: &PeripheralContext,
) -> Result<VariableState, HookError> {
    let Some(device_id) = ctx.device_id.as_deref() else {
        return Ok(state);
    };

    // Outer `Option` is presence; a present variable may still be null.
    let take = |state: &VariableState, name: &str| {
        state
            .has_variable(name)
            .then(|| state.value(name).map(str::to_owned))
    };
    let lights = take(&state, TRIGGER_LIGHTS);
    let on = take(&state, TRIGGER_LIGHTS_ON);
    let off = take(&state, TRIGGER_LIGHTS_OFF);
    let timeout = take(&state, TRIGGER_LIGHTS_OFF_TIMEOUT);
    let lights_timestamp = state.timestamp(TRIGGER_LIGHTS);

    for (name, value) in [
        (TRIGGER_LIGHTS, &lights),
        (TRIGGER_LIGHTS_ON, &on),
        (TRIGGER_LIGHTS_OFF, &off),
        (TRIGGER_LIGHTS_OFF_TIMEOUT, &timeout),
    ] {
        if value.is_some() {
            state.remove(name);
        }
    }

    match (&lights, &on, &off, &timeout) {
        (Some(lights), Some(on), Some(off), Some(timeout)) => {
            if parse_flag(TRIGGER_LIGHTS, lights.as_deref())? {
                let timeout = match timeout.as_deref() {
                    None | Some("") => "0",
                    Some(raw) => raw,
                };
                let config = LightMotionConfig {
                    device_id: Some(device_id.to_owned()),
                    peripheral_id: Some(GANGBOX_PERIPHERAL_ID.to_owned()),
                    trigger_on: parse_flag(TRIGGER_LIGHTS_ON, on.as_deref())?,
                    trigger_off: parse_flag(TRIGGER_LIGHTS_OFF, off.as_deref())?,
                    trigger_off_timeout_sec: timeout
                        .parse()
                        .map_err(|_| HookError::field(TRIGGER_LIGHTS_OFF_TIMEOUT, "an integer"))?,
                };
                state.set(
                    &light_config_variable(device_id),
                    Some(serde_json::to_string(&config)?),
                    lights_timestamp,
                );
            }
        }
        (None, None, None, None) => {}
        _ => {
            tracing::warn!(
                device_id,
                ?state,
                "incomplete motion variables, light motion config not migrated"
            );
        }
    }
    Ok(state)
}

fn split_light_config(
    mut state: VariableState,
    ctx: &PeripheralContext,
) -> Result<VariableState, HookError> {
    let Some(device_id) = ctx.device_id.as_deref() else {
        return Ok(state);
    };

    let config_name = state
        .variables
        .keys()
        .find(|name| {
            let parts: Vec<&str> = name.split(':').collect();
            name.starts_with(LIGHT_MOTION_CONFIG_PREFIX)
                && parts.len() >= 3
                && parts[1] == device_id
                && parts[2] == GANGBOX_PERIPHERAL_ID
        })
        .cloned();
    let Some(config_name) = config_name else {
        return Ok(state);
    };

    let raw = state.value(&config_name).map(str::to_owned);
    let timestamp = state.timestamp(&config_name);
    state.remove(&config_name);

    if let Some(raw) = raw {
        let config: LightMotionConfig = serde_json::from_str(&raw)?;
        let flag = |b: bool| Some(if b { "1" } else { "0" }.to_owned());
        state.set(TRIGGER_LIGHTS, Some("1".to_owned()), timestamp);
        state.set(TRIGGER_LIGHTS_ON, flag(config.trigger_on), timestamp);
        state.set(TRIGGER_LIGHTS_OFF, flag(config.trigger_off), timestamp);
        state.set(
            TRIGGER_LIGHTS_OFF_TIMEOUT,
            Some(config.trigger_off_timeout_sec.to_string()),
            timestamp,
        );
    }
    Ok(state)
}

/// 20181018: `trigger_screen` split into on and off triggers. An enabled
/// screen trigger keeps turning the screen off.
fn add_screen_off(
    mut state: VariableState,
    _: &PeripheralContext,
) -> Result<VariableState, HookError> {
    let enabled = match state.value(TRIGGER_SCREEN) {
        Some(raw) if !raw.is_empty() => parse_flag(TRIGGER_SCREEN, Some(raw))?,
        _ => false,
    };
    if enabled {
        let timestamp = state.timestamp(TRIGGER_SCREEN);
        state.set(TRIGGER_SCREEN_OFF, Some("1".to_owned()), timestamp);
    }
    Ok(state)
}

fn remove_screen_off(
    mut state: VariableState,
    _: &PeripheralContext,
) -> Result<VariableState, HookError> {
    state.remove(TRIGGER_SCREEN_OFF);
    Ok(state)
}
