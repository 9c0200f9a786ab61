//! The `DeviceProvisioning` service. Its payloads have not changed since
//! it was introduced, so the chain carries no hooks.

use verchain::{Manifest, MigrateError, ServiceDomain};

pub const NAME: &str = "DeviceProvisioning";

pub fn build(manifest: &Manifest) -> Result<ServiceDomain, MigrateError> {
    let versions = manifest.domain(NAME)?.versions()?;
    ServiceDomain::builder(NAME).versions(versions).build()
}
