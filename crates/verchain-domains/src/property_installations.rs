//! The `PropertyInstallations` service.
//!
//! A property installation carries peripheral state captured during
//! provisioning as bare values. Each version migrates those values through
//! the peripheral catalog as if they were live variables on the
//! configuration virtual device; timestamps play no part.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use verchain::{
    Context, Direction, HookError, Manifest, MigrateError, PeripheralCatalog, PeripheralContext,
    Record, ServiceDomain, ServiceKey, Version,
};

use crate::device::CONFIGURATION_VIRTUAL_DEVICE;
use crate::variables::{apply_migrations, update_variables_map, Variable, VariableMap};
use crate::{from_record, to_record};

pub const NAME: &str = "PropertyInstallations";

pub const MIGRATE_PROPERTY_INSTALLATION: &str = "migrate_property_installation";

/// Peripheral owning the post-provision `StateConfig`.
pub const STATE_CONFIG: &str = "state_config";
/// Variable name the post-provision state is migrated under.
pub const POST_PROVISION_VARIABLE: &str = "state_config:placeholder";

#[derive(Debug, Serialize, Deserialize)]
struct MigrateArgs {
    property_installation: PropertyInstallation,
    #[serde(flatten)]
    extra: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyInstallation {
    #[serde(default)]
    pub device_provision_state: Vec<ProvisionedDevice>,
    /// A serialized `StateConfig`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_provision_state: Option<String>,
    #[serde(flatten)]
    pub extra: Record,
}

/// One provisioned device: a serialized `PeripheralInfo` and the variable
/// it is stored under on its configuration peripheral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedDevice {
    pub variable_name: String,
    pub serialized_peripheral_info: String,
}

/// The part of a `PeripheralInfo` that routes its migration.
#[derive(Debug, Deserialize)]
struct PeripheralInfo {
    #[serde(default)]
    configuration_peripheral_id: Option<String>,
}

/// Build the service chain over `catalog`.
pub fn build(
    manifest: &Manifest,
    catalog: Arc<PeripheralCatalog>,
) -> Result<ServiceDomain, MigrateError> {
    let versions = manifest.domain(NAME)?.versions()?;
    let mut builder = ServiceDomain::builder(NAME).versions(versions.iter().cloned());
    for version in versions {
        builder = builder
            .hook(
                version.clone(),
                ServiceKey::args_up(MIGRATE_PROPERTY_INSTALLATION),
                migrate_args(catalog.clone(), version.clone(), Direction::Up),
            )
            .hook(
                version.clone(),
                ServiceKey::args_down(MIGRATE_PROPERTY_INSTALLATION),
                migrate_args(catalog.clone(), version, Direction::Down),
            );
    }
    builder.build()
}

fn migrate_args(
    catalog: Arc<PeripheralCatalog>,
    version: Version,
    direction: Direction,
) -> impl Fn(Record, &Context) -> Result<Record, HookError> + Send + Sync + 'static {
    move |args, ctx| {
        let mut view: MigrateArgs = from_record(args)?;
        let migrator = ValueMigrator {
            catalog: &catalog,
            version: &version,
            direction,
            now_ms: ctx.now_ms(),
        };
        migrator.migrate(&mut view.property_installation)?;
        to_record(&view)
    }
}

/// Runs one version's peripheral hooks over bare variable values.
struct ValueMigrator<'a> {
    catalog: &'a PeripheralCatalog,
    version: &'a Version,
    direction: Direction,
    now_ms: i64,
}

impl ValueMigrator<'_> {
    fn migrate(&self, installation: &mut PropertyInstallation) -> Result<(), HookError> {
        let mut provisioned = Vec::with_capacity(installation.device_provision_state.len());
        for entry in installation.device_provision_state.drain(..) {
            if let Some(entry) = self.migrate_provisioned(entry)? {
                provisioned.push(entry);
            }
        }
        installation.device_provision_state = provisioned;

        if let Some(state) = installation.post_provision_state.take() {
            let mut values = BTreeMap::from([(POST_PROVISION_VARIABLE.to_owned(), Some(state))]);
            values = self.migrate_values(STATE_CONFIG, values)?;
            let migrated = values.remove(POST_PROVISION_VARIABLE).ok_or_else(|| {
                HookError::new(format!("{POST_PROVISION_VARIABLE} was removed by migration"))
            })?;
            installation.post_provision_state = migrated;
        }
        Ok(())
    }

    /// An entry whose variable the migration removed is dropped; any
    /// variables the migration added have nowhere to go and are ignored.
    fn migrate_provisioned(
        &self,
        entry: ProvisionedDevice,
    ) -> Result<Option<ProvisionedDevice>, HookError> {
        let info: PeripheralInfo = serde_json::from_str(&entry.serialized_peripheral_info)?;
        let peripheral = info.configuration_peripheral_id.ok_or_else(|| {
            HookError::field("configuration_peripheral_id", "a configuration peripheral")
        })?;

        let ProvisionedDevice {
            variable_name,
            serialized_peripheral_info,
        } = entry;
        let values = BTreeMap::from([(variable_name.clone(), Some(serialized_peripheral_info))]);
        let mut values = self.migrate_values(&peripheral, values)?;
        match values.remove(&variable_name) {
            Some(Some(serialized_peripheral_info)) => Ok(Some(ProvisionedDevice {
                variable_name,
                serialized_peripheral_info,
            })),
            _ => {
                tracing::debug!(
                    variable = %variable_name,
                    peripheral = %peripheral,
                    version = %self.version,
                    "provisioned device dropped by migration"
                );
                Ok(None)
            }
        }
    }

    /// Migrate `values` as `peripheral`'s variables, all stamped now.
    fn migrate_values(
        &self,
        peripheral: &str,
        values: BTreeMap<String, Option<String>>,
    ) -> Result<BTreeMap<String, Option<String>>, MigrateError> {
        let variables: VariableMap = values
            .iter()
            .map(|(name, value)| {
                let variable = Variable::created(name, value.clone(), Some(self.now_ms));
                (name.clone(), Some(variable))
            })
            .collect();
        let ctx = PeripheralContext::at(Some(CONFIGURATION_VIRTUAL_DEVICE), self.now_ms);
        let changes = apply_migrations(
            self.catalog,
            peripheral,
            self.version,
            self.direction,
            &variables,
            &ctx,
        )?;
        if changes.is_empty() {
            return Ok(values);
        }
        Ok(update_variables_map(variables, &changes)
            .into_iter()
            .map(|(name, variable)| (name, variable.and_then(|v| v.value)))
            .collect())
    }
}
