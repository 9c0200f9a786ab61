//! Peripheral variable chains.
//!
//! Peripheral versions share the service version labels: a service hop to
//! or from version `V` runs the peripheral's own hook at `V` when its chain
//! declares `V`, otherwise the global hook at `V`.

pub mod device_config;
pub mod example;
pub mod global;
pub mod lifx;
pub mod motion;
pub mod scene_config;

use verchain::{Manifest, MigrateError, PeripheralCatalog};

/// Build the catalog of every known peripheral chain.
pub fn catalog(manifest: &Manifest) -> Result<PeripheralCatalog, MigrateError> {
    let catalog = PeripheralCatalog::builder()
        .global(global::chain(manifest.domain(global::NAME)?)?)
        .peripheral(example::chain(manifest.domain(example::NAME)?)?)
        .peripheral(motion::chain(manifest.domain(motion::NAME)?)?)
        .peripheral(lifx::chain(manifest.domain(lifx::NAME)?)?)
        .peripheral(device_config::chain(manifest.domain(device_config::NAME)?)?)
        .peripheral(scene_config::chain(manifest.domain(scene_config::NAME)?)?)
        .build()?;
    tracing::debug!(peripherals = ?catalog.peripheral_types(), "peripheral catalog built");
    Ok(catalog)
}
