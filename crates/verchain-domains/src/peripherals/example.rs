//! Reference peripheral showing a value conversion and a dropped variable.

use verchain::{
    DomainManifest, HookError, MigrateError, PeripheralContext, PeripheralDomain,
    PeripheralDomainBuilder, VariableState, Version,
};

pub const NAME: &str = "example_peripheral";

pub fn chain(declared: &DomainManifest) -> Result<PeripheralDomainBuilder, MigrateError> {
    let celsius: Version = "20180221".parse()?;
    Ok(PeripheralDomain::builder(NAME)
        .versions(declared.versions()?)
        .up(celsius.clone(), |state, _: &PeripheralContext| {
            convert_temperature(state, |f| (f - 32.0) * 5.0 / 9.0)
        })
        .down(celsius, |state, _: &PeripheralContext| {
            convert_temperature(state, |c| c * 9.0 / 5.0 + 32.0)
        }))
}

/// 20180221: temperature moved from Fahrenheit to Celsius and
/// `variable_to_remove` went away.
fn convert_temperature(
    mut state: VariableState,
    convert: impl Fn(f64) -> f64,
) -> Result<VariableState, HookError> {
    if let Some(Some(raw)) = state.variables.get_mut("temperature") {
        let degrees: f64 = raw
            .parse()
            .map_err(|_| HookError::field("temperature", "a number"))?;
        // Debug keeps a trailing `.0` on whole numbers.
        *raw = format!("{:?}", convert(degrees));
    }
    state.variables.remove("variable_to_remove");
    Ok(state)
}
