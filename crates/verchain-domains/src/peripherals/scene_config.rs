//! Scene configuration: every scene is a `Scene` serialized into its own
//! `scene:<id>` variable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use verchain::{
    DomainManifest, HookError, MigrateError, PeripheralContext, PeripheralDomain,
    PeripheralDomainBuilder, Record, VariableState, Version,
};

use crate::device::CONFIGURATION_VIRTUAL_DEVICE;

pub const NAME: &str = "scene_config";

/// Prefix of the dynamic `scene:<id>` variables.
pub const SCENE_PREFIX: &str = "scene:";
/// Peripheral whose scene actions carry the art display settings.
pub const ART_CONFIG: &str = "art_config";

const SCENE_VALIDITY_STATES: &str = "scene_validity_states";
const PLAYING: &str = "playing";
const PLAY_URI: &str = "play_uri";
const USE_GLOBAL_ART_CONFIG: &str = "use_global_art_config";
const COLOR: &str = "color";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peripheral_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Record,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_variable_states: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_variable_states: Option<Value>,
    #[serde(flatten)]
    pub extra: Record,
}

/// Serialized into a `scene:` variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub actions: Vec<SceneAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_actions: Option<Vec<MultiAction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editable: Option<bool>,
    #[serde(flatten)]
    pub extra: Record,
}

impl Scene {
    /// True if an older reader can render this scene.
    fn is_legacy_compatible(&self) -> bool {
        let conditional = self.multi_actions.iter().flatten().any(|m| {
            is_populated(&m.expected_variable_states) || is_populated(&m.excluded_variable_states)
        });
        !conditional && self.editable != Some(false)
    }
}

/// Serialized into the `scene_validity_states` variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneValidityStates {
    #[serde(default)]
    pub scene_validity_states: BTreeMap<String, Value>,
}

fn is_populated(value: &Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(fields)) => !fields.is_empty(),
        Some(_) => true,
    }
}

pub fn chain(declared: &DomainManifest) -> Result<PeripheralDomainBuilder, MigrateError> {
    let conditional: Version = "20180925".parse()?;
    let play_uri: Version = "20181005".parse()?;
    let validity: Version = "20190412".parse()?;
    let global_art: Version = "20190604".parse()?;
    let configuration_art: Version = "20190614".parse()?;
    let color: Version = "20190716".parse()?;
    Ok(PeripheralDomain::builder(NAME)
        .versions(declared.versions()?)
        .down(conditional, drop_conditional_scenes)
        .up(play_uri.clone(), strip_playing)
        .down(play_uri, restore_playing)
        .up(validity, add_validity_states)
        .up(global_art.clone(), add_global_art_flag)
        .down(global_art, remove_global_art_flag)
        .up(configuration_art, remove_configuration_art_flag)
        .down(color, remove_color))
}

/// Names of the scene variables holding a serialized scene.
fn scene_variables(state: &VariableState) -> Vec<String> {
    state
        .variables
        .iter()
        .filter(|(name, value)| {
            name.starts_with(SCENE_PREFIX) && value.as_deref().is_some_and(|v| !v.is_empty())
        })
        .map(|(name, _)| name.clone())
        .collect()
}

fn read_scene(state: &VariableState, name: &str) -> Result<Option<Scene>, HookError> {
    match state.value(name) {
        Some(raw) if !raw.is_empty() => Ok(Some(serde_json::from_str(raw)?)),
        _ => Ok(None),
    }
}

/// Apply `edit` to every scene and write back the ones it reports as
/// changed, keeping their timestamps. Returns the rewritten names.
fn rewrite_scenes<F>(state: &mut VariableState, mut edit: F) -> Result<Vec<String>, HookError>
where
    F: FnMut(&mut Scene) -> bool,
{
    let mut rewritten = Vec::new();
    for name in scene_variables(state) {
        let Some(mut scene) = read_scene(state, &name)? else {
            continue;
        };
        if edit(&mut scene) {
            state.set(&name, Some(serde_json::to_string(&scene)?), None);
            rewritten.push(name);
        }
    }
    Ok(rewritten)
}

/// 20180925: conditional multi-actions and non-editable scenes. Older
/// readers cannot represent them, so those scenes are deleted going down.
fn drop_conditional_scenes(
    mut state: VariableState,
    _: &PeripheralContext,
) -> Result<VariableState, HookError> {
    for name in scene_variables(&state) {
        if let Some(scene) = read_scene(&state, &name)? {
            if !scene.is_legacy_compatible() {
                tracing::debug!(scene = %name, "dropping scene unsupported before 20180925");
                state.remove(&name);
            }
        }
    }
    Ok(state)
}

/// 20181005: an action with a `play_uri` no longer also sets `playing`,
/// which made speakers resume the previous track before switching.
fn strip_playing(
    mut state: VariableState,
    _: &PeripheralContext,
) -> Result<VariableState, HookError> {
    rewrite_scenes(&mut state, |scene| {
        let mut changed = false;
        for action in &mut scene.actions {
            if action.variables.contains_key(PLAY_URI) {
                changed |= action.variables.remove(PLAYING).is_some();
            }
        }
        changed
    })?;
    Ok(state)
}

fn restore_playing(
    mut state: VariableState,
    _: &PeripheralContext,
) -> Result<VariableState, HookError> {
    rewrite_scenes(&mut state, |scene| {
        let mut changed = false;
        for action in &mut scene.actions {
            if action.variables.contains_key(PLAY_URI) && !action.variables.contains_key(PLAYING) {
                action.variables.insert(PLAYING.to_owned(), "1".to_owned());
                changed = true;
            }
        }
        changed
    })?;
    Ok(state)
}

/// 20190412: scene validity tracking starts out empty.
fn add_validity_states(
    mut state: VariableState,
    ctx: &PeripheralContext,
) -> Result<VariableState, HookError> {
    if !state.has_variable(SCENE_VALIDITY_STATES) {
        let empty = serde_json::to_string(&SceneValidityStates::default())?;
        state.set(SCENE_VALIDITY_STATES, Some(empty), Some(ctx.now_ms));
    }
    Ok(state)
}

fn is_art_action(action: &SceneAction) -> bool {
    action.peripheral_name.as_deref() == Some(ART_CONFIG)
}

/// 20190604: art actions choose between their own and the global art
/// config; existing actions keep their own.
fn add_global_art_flag(
    mut state: VariableState,
    _: &PeripheralContext,
) -> Result<VariableState, HookError> {
    rewrite_scenes(&mut state, |scene| {
        let mut changed = false;
        for action in scene.actions.iter_mut().filter(|a| is_art_action(a)) {
            if !action.variables.contains_key(USE_GLOBAL_ART_CONFIG) {
                action.variables.insert(USE_GLOBAL_ART_CONFIG.to_owned(), "0".to_owned());
                changed = true;
            }
        }
        changed
    })?;
    Ok(state)
}

fn remove_global_art_flag(
    mut state: VariableState,
    _: &PeripheralContext,
) -> Result<VariableState, HookError> {
    rewrite_scenes(&mut state, |scene| {
        let mut changed = false;
        for action in scene.actions.iter_mut().filter(|a| is_art_action(a)) {
            if action.variables.remove(USE_GLOBAL_ART_CONFIG).is_some() {
                changed = true;
            }
        }
        changed
    })?;
    Ok(state)
}

/// 20190614: art actions on the configuration virtual device are the
/// global art config and lose the flag. Rewritten scenes are stamped now.
fn remove_configuration_art_flag(
    mut state: VariableState,
    ctx: &PeripheralContext,
) -> Result<VariableState, HookError> {
    let rewritten = rewrite_scenes(&mut state, |scene| {
        let mut changed = false;
        for action in scene.actions.iter_mut().filter(|a| {
            is_art_action(a) && a.device_id.as_deref() == Some(CONFIGURATION_VIRTUAL_DEVICE)
        }) {
            if action.variables.remove(USE_GLOBAL_ART_CONFIG).is_some() {
                changed = true;
            }
        }
        changed
    })?;
    for name in rewritten {
        state.timestamps.insert(name, ctx.now_ms);
    }
    Ok(state)
}

/// 20190716: actions may set a color. Going down the color is dropped and
/// the scene's timestamp moves back by one so a newer copy still wins.
fn remove_color(
    mut state: VariableState,
    _: &PeripheralContext,
) -> Result<VariableState, HookError> {
    let rewritten = rewrite_scenes(&mut state, |scene| {
        let mut changed = false;
        for action in &mut scene.actions {
            if action.variables.remove(COLOR).is_some() {
                changed = true;
            }
        }
        changed
    })?;
    for name in rewritten {
        if let Some(ts) = state.timestamps.get_mut(&name) {
            *ts -= 1;
        }
    }
    Ok(state)
}
