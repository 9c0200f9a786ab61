//! Migrations every peripheral type goes through.

use serde::{Deserialize, Serialize};
use verchain::{
    DomainManifest, HookError, MigrateError, PeripheralContext, PeripheralDomain,
    PeripheralDomainBuilder, VariableState, Version,
};

pub const NAME: &str = "global";

/// Serialized into the `room_assignment` variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAssignment {
    #[serde(default)]
    pub room_ids: Vec<String>,
}

pub fn chain(declared: &DomainManifest) -> Result<PeripheralDomainBuilder, MigrateError> {
    let rooms: Version = "20180620".parse()?;
    Ok(PeripheralDomain::builder(NAME)
        .versions(declared.versions()?)
        .up(rooms.clone(), room_id_to_assignment)
        .down(rooms, room_assignment_to_id))
}

/// 20180620: a peripheral may belong to several rooms.
fn room_id_to_assignment(
    mut state: VariableState,
    _: &PeripheralContext,
) -> Result<VariableState, HookError> {
    let Some(room_id) = state.variables.remove("room_id") else {
        return Ok(state);
    };
    let assignment = RoomAssignment {
        room_ids: room_id.into_iter().filter(|id| !id.is_empty()).collect(),
    };
    let timestamp = state.timestamps.remove("room_id");
    state.set(
        "room_assignment",
        Some(serde_json::to_string(&assignment)?),
        timestamp,
    );
    Ok(state)
}

fn room_assignment_to_id(
    mut state: VariableState,
    _: &PeripheralContext,
) -> Result<VariableState, HookError> {
    let Some(serialized) = state.variables.remove("room_assignment") else {
        return Ok(state);
    };
    let assignment = match serialized.as_deref() {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
        _ => RoomAssignment::default(),
    };
    let room_id = assignment.room_ids.into_iter().next().unwrap_or_default();
    let timestamp = state.timestamps.remove("room_assignment");
    state.set("room_id", Some(room_id), timestamp);
    Ok(state)
}
