//! LIFX integration configuration.

use verchain::{
    DomainManifest, HookError, MigrateError, PeripheralContext, PeripheralDomain,
    PeripheralDomainBuilder, VariableState, Version,
};

pub const NAME: &str = "lifx_config";

/// OAuth variables with the value they default to.
const OAUTH_DEFAULTS: [(&str, &str); 3] = [
    ("access_token", ""),
    ("expiration_date", "0"),
    ("refresh_token", ""),
];

pub fn chain(declared: &DomainManifest) -> Result<PeripheralDomainBuilder, MigrateError> {
    let oauth: Version = "20190903".parse()?;
    Ok(PeripheralDomain::builder(NAME)
        .versions(declared.versions()?)
        .up(oauth, add_oauth_variables))
}

/// 20190903: configurations written before OAuth support get empty tokens.
/// Nothing to undo going down; older readers ignore the extra variables.
fn add_oauth_variables(
    mut state: VariableState,
    ctx: &PeripheralContext,
) -> Result<VariableState, HookError> {
    for (name, default) in OAUTH_DEFAULTS {
        if !state.has_variable(name) {
            state.set(name, Some(default.to_owned()), Some(ctx.now_ms));
        }
    }
    Ok(state)
}
